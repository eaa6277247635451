//! Reactive binding for UI-style consumers.
//!
//! [`SessionStore`] mirrors a session into a `tokio::sync::watch` channel so a
//! consumer can re-render on every change without registering listeners of
//! its own.

use crate::dispatcher::Subscription;
use crate::error::{SessionError, TransportError};
use crate::event::EventKind;
use crate::payload::Payload;
use crate::session::Session;
use crate::state::{SessionState, Status};
use std::sync::{Arc, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// What a consumer renders from.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub status: Status,
    pub is_open: bool,
    pub error: Option<Arc<TransportError>>,
    /// Buffered messages, oldest first.
    pub messages: Vec<Payload>,
    pub last_close_reason: Option<String>,
}

impl From<&SessionState> for StoreSnapshot {
    fn from(state: &SessionState) -> Self {
        Self {
            status: state.status,
            is_open: state.is_open(),
            error: state.error.clone(),
            messages: state.messages.to_vec(),
            last_close_reason: state.last_close_reason.clone(),
        }
    }
}

/// A mounted session.
pub struct SessionStore {
    session: Session,
    tx: Arc<watch::Sender<StoreSnapshot>>,
    subscriptions: Vec<Subscription>,
}

impl SessionStore {
    /// Subscribe to every event kind and open the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the session has shut down.
    pub async fn mount(session: Session) -> Result<Self, SessionError> {
        let shared = session.shared_state();
        let initial = StoreSnapshot::from(&*shared.read().unwrap_or_else(PoisonError::into_inner));
        let tx = Arc::new(watch::Sender::new(initial));

        // Listeners hold the state cell, not a session handle, so a mounted
        // store never keeps the controller alive on its own.
        let subscriptions = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let shared = Arc::clone(&shared);
                let tx = Arc::clone(&tx);
                session.on(kind, move |_| {
                    let state = shared.read().unwrap_or_else(PoisonError::into_inner);
                    tx.send_replace(StoreSnapshot::from(&*state));
                })
            })
            .collect();

        debug!(transport = %session.kind(), "Store mounted");
        let store = Self {
            session,
            tx,
            subscriptions,
        };
        store.session.open().await?;
        Ok(store)
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.tx.subscribe()
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn current(&self) -> StoreSnapshot {
        self.tx.borrow().clone()
    }

    /// The bound session, for `send` and ad-hoc listeners.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Unsubscribe and close the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the session has shut down.
    pub async fn unmount(mut self) -> Result<(), SessionError> {
        self.detach();
        debug!(transport = %self.session.kind(), "Store unmounted");
        self.session.close().await
    }

    fn detach(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if !self.subscriptions.is_empty() {
            self.detach();
            self.session.close_detached();
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &self.session)
            .field("mounted", &!self.subscriptions.is_empty())
            .finish()
    }
}
