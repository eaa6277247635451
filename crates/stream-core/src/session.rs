//! Session controller.
//!
//! A [`Session`] is a cheap, cloneable handle. The state machine itself runs
//! in a single controller task per session, which owns the adapter, the state,
//! the backoff generator and the reconnect timer. Adapter callbacks and caller
//! commands are both queued to that task, so transitions never interleave.
//!
//! ```text
//! idle ──open()──▶ connecting ──onOpen──▶ open ──close()──▶ closing ──▶ closed
//!                    │   ▲                 │
//!            failure │   │ backoff timer   │ onError / onClose
//!                    ▼   │                 ▼
//!                    error ◀───────────── error | closed
//! ```

use crate::adapter::{AdapterEvent, AdapterSignal, AdapterSink, Capability, TransportAdapter};
use crate::backoff::Backoff;
use crate::config::{SessionConfig, TransportKind};
use crate::dispatcher::{EventDispatcher, Subscription, SubscriptionId};
use crate::error::{SessionError, TransportError};
use crate::event::{EventKind, SessionEvent};
use crate::metrics;
use crate::payload::Payload;
use crate::state::{SessionState, Status};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, info, trace, warn};

/// Requests from session handles to the controller task.
enum Command {
    Open(oneshot::Sender<()>),
    Close(Option<oneshot::Sender<()>>),
    Send(Payload, oneshot::Sender<Result<(), SessionError>>),
    Snapshot(oneshot::Sender<SessionState>),
}

/// Handle to a streaming session.
///
/// Dropping every handle shuts the session down and closes the transport.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<RwLock<SessionState>>,
    config: Arc<SessionConfig>,
    capability: Capability,
}

impl Session {
    /// Create a session driving `adapter`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if the configuration fails
    /// validation or names a different kind than the adapter implements.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        config: SessionConfig,
        adapter: Box<dyn TransportAdapter>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if adapter.kind() != config.kind {
            return Err(SessionError::InvalidConfig(format!(
                "configuration requests {} but the adapter implements {}",
                config.kind,
                adapter.kind()
            )));
        }

        let config = Arc::new(config);
        let capability = adapter.capability();
        let dispatcher = EventDispatcher::new();
        let state = Arc::new(RwLock::new(SessionState::new(config.buffer_limit)));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let controller = Controller {
            kind: config.kind,
            backoff: Backoff::from_config(&config.backoff),
            config: Arc::clone(&config),
            adapter,
            dispatcher: Arc::clone(&dispatcher),
            state: Arc::clone(&state),
            retries: 0,
            epoch: 0,
            retry_timer: None,
            events_tx,
            events_rx,
            commands: commands_rx,
        };

        debug!(
            transport = %config.kind,
            address = %config.address,
            ?capability,
            "Session created"
        );
        tokio::spawn(controller.run());

        Ok(Self {
            commands: commands_tx,
            dispatcher,
            state,
            config,
            capability,
        })
    }

    /// Start connecting.
    ///
    /// Resolves once the adapter's `open()` has settled. Failures are reported
    /// through the `error` event and may schedule a reconnect; they are not
    /// returned here. Calling `open()` while connecting or open does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the controller has shut down.
    pub async fn open(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Open(tx))?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    /// Close the session and cancel any pending reconnect.
    ///
    /// Never triggers an automatic reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the controller has shut down.
    pub async fn close(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Close(Some(tx)))?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    /// Request a close without waiting for it.
    pub(crate) fn close_detached(&self) {
        let _ = self.commands.send(Command::Close(None));
    }

    /// Send a payload over the transport.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Capability`] if the transport is receive-only; the
    ///   transport is never touched.
    /// - [`SessionError::NotOpen`] if the session is not open.
    /// - [`SessionError::Transport`] if the adapter failed to send.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), SessionError> {
        if !self.capability.can_send() {
            return Err(SessionError::Capability {
                kind: self.config.kind,
                operation: "send",
            });
        }

        let status = self.read_state().status;
        if status != Status::Open {
            return Err(SessionError::NotOpen(status));
        }

        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(payload.into(), tx))?;
        rx.await.map_err(|_| SessionError::Terminated)?
    }

    /// Subscribe to an event kind. Listeners run on the controller task, in
    /// subscription order.
    ///
    /// A listener that captures a [`Session`] keeps the session running after
    /// every other handle is dropped. Capture a [`WeakSession`] from
    /// [`Session::downgrade`] instead.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, listener)
    }

    /// Subscribe to received messages.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on(EventKind::Message, move |event| {
            if let SessionEvent::Message(payload) = event {
                listener(payload);
            }
        })
    }

    /// Subscribe to status changes.
    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        self.on(EventKind::Status, move |event| {
            if let SessionEvent::Status(status) = event {
                listener(*status);
            }
        })
    }

    /// Subscribe to transport errors.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<TransportError>) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let SessionEvent::Error(err) = event {
                listener(err);
            }
        })
    }

    /// Remove a listener. Returns `true` if it was subscribed.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(kind, id)
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.read_state().clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.read_state().status
    }

    /// State after every event queued before this call has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Terminated`] if the controller has shut down.
    pub async fn snapshot(&self) -> Result<SessionState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Active transport kind.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.config.kind
    }

    /// Whether the transport can send.
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// A handle that does not keep the session alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            commands: self.commands.downgrade(),
            dispatcher: Arc::downgrade(&self.dispatcher),
            state: Arc::clone(&self.state),
            config: Arc::clone(&self.config),
            capability: self.capability,
        }
    }

    /// Published state cell, for bindings that must not hold a handle.
    pub(crate) fn shared_state(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.state)
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Terminated)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.config.kind)
            .field("address", &self.config.address)
            .field("status", &self.status())
            .finish()
    }
}

/// Non-owning session handle, for listeners that call back into their session.
#[derive(Clone)]
pub struct WeakSession {
    commands: mpsc::WeakUnboundedSender<Command>,
    dispatcher: Weak<EventDispatcher>,
    state: Arc<RwLock<SessionState>>,
    config: Arc<SessionConfig>,
    capability: Capability,
}

impl WeakSession {
    /// A full handle, unless every [`Session`] has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<Session> {
        Some(Session {
            commands: self.commands.upgrade()?,
            dispatcher: self.dispatcher.upgrade()?,
            state: Arc::clone(&self.state),
            config: Arc::clone(&self.config),
            capability: self.capability,
        })
    }

    /// Latest published state. Readable after the session has shut down.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for WeakSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakSession")
            .field("kind", &self.config.kind)
            .field("address", &self.config.address)
            .finish_non_exhaustive()
    }
}

/// The state machine. Runs on its own task; see the module docs.
struct Controller {
    kind: TransportKind,
    config: Arc<SessionConfig>,
    adapter: Box<dyn TransportAdapter>,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<RwLock<SessionState>>,
    backoff: Backoff,
    retries: u32,
    /// Current connection attempt. Adapter events from other epochs are stale.
    epoch: u64,
    retry_timer: Option<Pin<Box<Sleep>>>,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    events_rx: mpsc::UnboundedReceiver<AdapterEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Controller {
    async fn run(mut self) {
        loop {
            // Adapter events first: an `onOpen` that arrived while `open()` was
            // in flight is applied before a `close()` queued behind it.
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => self.handle_adapter_event(event),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                () = retry_elapsed(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    debug!(transport = %self.kind, retries = self.retries, "Reconnect timer fired");
                    self.attempt_open().await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open(ack) => {
                let status = self.status();
                if matches!(status, Status::Connecting | Status::Open) {
                    debug!(transport = %self.kind, %status, "Open ignored");
                } else {
                    self.attempt_open().await;
                }
                let _ = ack.send(());
            }
            Command::Close(ack) => {
                self.close_session().await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Send(payload, reply) => {
                let _ = reply.send(self.send(payload).await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.read_state().clone());
            }
        }
    }

    fn handle_adapter_event(&mut self, event: AdapterEvent) {
        if event.epoch != self.epoch {
            trace!(
                transport = %self.kind,
                epoch = event.epoch,
                current = self.epoch,
                "Discarding stale adapter event"
            );
            return;
        }

        match event.signal {
            AdapterSignal::Opened => self.on_open(),
            AdapterSignal::Closed(reason) => self.on_close(reason),
            AdapterSignal::Failed(err) => self.on_error(err),
            AdapterSignal::Message(payload) => self.on_message(payload),
        }
    }

    async fn attempt_open(&mut self) {
        self.retry_timer = None;
        self.epoch += 1;
        let sink = AdapterSink::new(self.epoch, self.events_tx.clone());

        self.transition(Status::Connecting);
        self.dispatch(SessionEvent::Status(Status::Connecting));

        metrics::record_open_attempt(self.kind);
        info!(
            transport = %self.kind,
            address = %self.config.address,
            retries = self.retries,
            "Opening transport"
        );

        let outcome =
            match tokio::time::timeout(self.config.open_timeout(), self.adapter.open(sink)).await {
                Ok(result) => result,
                Err(_) => {
                    // The adapter's open future was dropped mid-flight.
                    if let Err(e) = self.adapter.close().await {
                        debug!(transport = %self.kind, error = %e, "Cleanup after timeout failed");
                    }
                    Err(TransportError::Timeout)
                }
            };

        let Err(err) = outcome else {
            return;
        };

        // Nothing from the failed attempt may arrive after this point.
        self.epoch += 1;
        self.retries = self.retries.saturating_add(1);
        self.publish_retries();
        warn!(
            transport = %self.kind,
            error = %err,
            retries = self.retries,
            "Transport open failed"
        );
        self.fail(err);

        if self.config.auto_reconnect && self.retries <= self.config.max_retries {
            self.schedule_reconnect();
        } else if self.config.auto_reconnect {
            warn!(
                transport = %self.kind,
                max_retries = self.config.max_retries,
                "Retry budget exhausted, giving up"
            );
        }
    }

    async fn close_session(&mut self) {
        if self.retry_timer.take().is_some() {
            debug!(transport = %self.kind, "Cancelled pending reconnect");
        }
        self.epoch += 1;

        self.transition(Status::Closing);
        self.dispatch(SessionEvent::Status(Status::Closing));

        if let Err(e) = self.adapter.close().await {
            warn!(transport = %self.kind, error = %e, "Adapter close failed");
        }

        self.transition(Status::Closed);
        self.dispatch(SessionEvent::Status(Status::Closed));
        info!(transport = %self.kind, "Session closed");
    }

    async fn send(&mut self, payload: Payload) -> Result<(), SessionError> {
        let status = self.status();
        if status != Status::Open {
            return Err(SessionError::NotOpen(status));
        }

        match self.adapter.send(payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = Arc::new(err);
                warn!(transport = %self.kind, error = %err, "Send failed");
                metrics::record_error(self.kind);
                self.update(|state| state.error = Some(Arc::clone(&err)));
                self.dispatch(SessionEvent::Error(Arc::clone(&err)));
                Err(SessionError::Transport(err))
            }
        }
    }

    fn on_open(&mut self) {
        if self.status() == Status::Open {
            trace!(transport = %self.kind, "Duplicate open signal ignored");
            return;
        }

        self.retries = 0;
        self.backoff.reset();
        self.update(|state| {
            state.error = None;
            state.retries = 0;
        });
        self.transition(Status::Open);

        metrics::record_opened(self.kind);
        info!(transport = %self.kind, address = %self.config.address, "Transport open");

        self.dispatch(SessionEvent::Open);
        self.dispatch(SessionEvent::Status(Status::Open));
    }

    fn on_close(&mut self, reason: Option<String>) {
        // The connection is gone; anything it still emits is stale.
        self.epoch += 1;

        self.update(|state| state.last_close_reason.clone_from(&reason));
        self.transition(Status::Closed);
        info!(transport = %self.kind, reason = ?reason, "Transport closed");

        self.dispatch(SessionEvent::Close(reason));
        self.dispatch(SessionEvent::Status(Status::Closed));

        if !self.config.auto_reconnect {
            return;
        }
        if self.retries < self.config.max_retries {
            self.retries += 1;
            self.publish_retries();
            self.schedule_reconnect();
        } else {
            warn!(
                transport = %self.kind,
                max_retries = self.config.max_retries,
                "Retry budget exhausted, staying closed"
            );
        }
    }

    fn on_error(&mut self, err: TransportError) {
        warn!(transport = %self.kind, error = %err, "Transport error");
        self.fail(err);
    }

    fn on_message(&mut self, payload: Payload) {
        let evicted = self.update(|state| state.messages.push(payload.clone()));
        metrics::record_message(self.kind, evicted);
        if evicted > 0 {
            trace!(transport = %self.kind, evicted, "Buffer full, evicted oldest");
        }
        self.dispatch(SessionEvent::Message(payload));
    }

    /// Record an error, enter `error`, and dispatch `error` then `status`.
    fn fail(&mut self, err: TransportError) {
        let err = Arc::new(err);
        metrics::record_error(self.kind);
        self.update(|state| state.error = Some(Arc::clone(&err)));
        self.transition(Status::Error);

        self.dispatch(SessionEvent::Error(err));
        self.dispatch(SessionEvent::Status(Status::Error));
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next();
        metrics::record_reconnect(self.kind, delay);
        info!(
            transport = %self.kind,
            delay_ms = delay.as_millis() as u64,
            retries = self.retries,
            "Scheduling reconnect"
        );
        self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    async fn shutdown(&mut self) {
        self.retry_timer = None;
        if !matches!(self.status(), Status::Idle | Status::Closed) {
            debug!(transport = %self.kind, "All handles dropped, closing");
            self.close_session().await;
        }
        debug!(transport = %self.kind, "Controller stopped");
    }

    fn transition(&mut self, status: Status) {
        let previous = self.update(|state| std::mem::replace(&mut state.status, status));
        if previous == Status::Open && status != Status::Open {
            metrics::record_left_open(self.kind);
        }
        trace!(transport = %self.kind, from = %previous, to = %status, "Status changed");
    }

    fn publish_retries(&mut self) {
        let retries = self.retries;
        self.update(|state| state.retries = retries);
    }

    fn dispatch(&self, event: SessionEvent) {
        self.dispatcher.dispatch(&event);
    }

    fn status(&self) -> Status {
        self.read_state().status
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Resolves when the reconnect timer fires; never resolves without one.
fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// What the scripted adapter does on each `open()`.
    #[derive(Debug, Clone, Copy)]
    enum Step {
        Fail,
        Connect,
        ConnectAfter(Duration),
        Hang,
    }

    #[derive(Default)]
    struct Probe {
        opens: Mutex<Vec<Instant>>,
        closes: AtomicUsize,
        sent: Mutex<Vec<Payload>>,
        sink: Mutex<Option<AdapterSink>>,
    }

    impl Probe {
        fn sink(&self) -> AdapterSink {
            self.sink.lock().unwrap().clone().expect("adapter was never opened")
        }

        fn open_count(&self) -> usize {
            self.opens.lock().unwrap().len()
        }

        fn open_gaps(&self) -> Vec<Duration> {
            let opens = self.opens.lock().unwrap();
            opens.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    struct ScriptedAdapter {
        capability: Capability,
        script: VecDeque<Step>,
        probe: Arc<Probe>,
        fail_send: bool,
    }

    #[async_trait]
    impl TransportAdapter for ScriptedAdapter {
        fn kind(&self) -> TransportKind {
            TransportKind::Websocket
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
            self.probe.opens.lock().unwrap().push(Instant::now());
            *self.probe.sink.lock().unwrap() = Some(sink.clone());

            match self.script.pop_front().unwrap_or(Step::Connect) {
                Step::Fail => Err(TransportError::ConnectFailed("connection refused".into())),
                Step::Connect => {
                    sink.opened();
                    Ok(())
                }
                Step::ConnectAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    sink.opened();
                    Ok(())
                }
                Step::Hang => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
            self.probe.sent.lock().unwrap().push(payload);
            if self.fail_send {
                Err(TransportError::SendFailed("broken pipe".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Timer deadlines are tracked at millisecond granularity.
    fn assert_gaps(probe: &Probe, expected_ms: &[u64]) {
        let gaps = probe.open_gaps();
        assert_eq!(gaps.len(), expected_ms.len(), "gaps: {gaps:?}");
        for (gap, expected) in gaps.iter().zip(expected_ms) {
            let expected = Duration::from_millis(*expected);
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(5),
                "gap {gap:?}, expected {expected:?}"
            );
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig::new(TransportKind::Websocket, "ws://test.invalid/ws")
            .with_backoff(BackoffConfig::fixed(100, 10_000, 2.0))
    }

    fn scripted(
        config: SessionConfig,
        capability: Capability,
        script: impl IntoIterator<Item = Step>,
    ) -> (Session, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let adapter = ScriptedAdapter {
            capability,
            script: script.into_iter().collect(),
            probe: Arc::clone(&probe),
            fail_send: false,
        };
        let session = Session::new(config, Box::new(adapter)).unwrap();
        (session, probe)
    }

    /// Record every event as a short string.
    fn record(session: &Session) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let log = Arc::clone(&log);
            session.on(kind, move |event| {
                let entry = match event {
                    SessionEvent::Status(status) => format!("status:{status}"),
                    SessionEvent::Close(Some(reason)) => format!("close:{reason}"),
                    other => other.kind().to_string(),
                };
                log.lock().unwrap().push(entry);
            });
        }
        log
    }

    fn statuses(log: &Mutex<Vec<String>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix("status:").map(str::to_string))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_dispatches_open_then_status() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        let log = record(&session);
        assert_eq!(session.status(), Status::Idle);

        session.open().await.unwrap();
        let state = session.snapshot().await.unwrap();

        assert!(state.is_open());
        assert_eq!(state.retries, 0);
        assert_eq!(probe.open_count(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["status:connecting", "open", "status:open"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_until_open() {
        let config = test_config().with_max_retries(2);
        let (session, probe) = scripted(
            config,
            Capability::Bidirectional,
            [Step::Fail, Step::Fail, Step::Connect],
        );
        let log = record(&session);

        session.open().await.unwrap();
        assert_eq!(session.state().retries, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = session.snapshot().await.unwrap();

        assert_eq!(state.status, Status::Open);
        assert_eq!(state.retries, 0);
        assert!(state.error.is_none());
        assert_eq!(probe.open_count(), 3);

        assert_gaps(&probe, &[100, 200]);

        assert_eq!(
            statuses(&log),
            vec!["connecting", "error", "connecting", "error", "connecting", "open"]
        );
        let errors = log.lock().unwrap().iter().filter(|e| *e == "error").count();
        assert_eq!(errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let config = test_config().with_max_retries(2);
        let (session, probe) = scripted(config, Capability::Bidirectional, [Step::Fail; 6]);

        session.open().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let state = session.snapshot().await.unwrap();
        assert_eq!(probe.open_count(), 3);
        assert_eq!(state.status, Status::Error);
        assert_eq!(state.retries, 3);
        assert!(matches!(
            state.error.as_deref(),
            Some(TransportError::ConnectFailed(_))
        ));

        // Only the caller can start over, and the counter is not reset by that.
        session.open().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.open_count(), 4);
        assert_eq!(session.state().retries, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_close_without_auto_reconnect() {
        let config = test_config().with_auto_reconnect(false);
        let (session, probe) = scripted(config, Capability::Bidirectional, [Step::Connect]);
        let log = record(&session);

        session.open().await.unwrap();
        probe.sink().closed(Some("server restart".into()));

        let state = session.snapshot().await.unwrap();
        assert_eq!(state.status, Status::Closed);
        assert_eq!(state.last_close_reason.as_deref(), Some("server restart"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.open_count(), 1);
        assert_eq!(session.status(), Status::Closed);

        let log = log.lock().unwrap();
        let tail: Vec<_> = log.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec!["close:server restart", "status:closed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_close_reconnects() {
        let (session, probe) = scripted(
            test_config(),
            Capability::Bidirectional,
            [Step::Connect, Step::Connect],
        );

        session.open().await.unwrap();
        probe.sink().closed(None);
        assert_eq!(session.snapshot().await.unwrap().retries, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = session.snapshot().await.unwrap();

        assert_eq!(probe.open_count(), 2);
        assert_gaps(&probe, &[100]);
        assert_eq!(state.status, Status::Open);
        assert_eq!(state.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        let log = record(&session);

        session.open().await.unwrap();
        probe.sink().closed(None);
        assert_eq!(session.snapshot().await.unwrap().status, Status::Closed);

        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(probe.open_count(), 1);
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), Status::Closed);
        assert_eq!(statuses(&log).last().map(String::as_str), Some("closed"));
        assert_eq!(
            statuses(&log),
            vec!["connecting", "open", "closed", "closing", "closed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_reconnect_after_failed_open() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Fail]);

        session.open().await.unwrap();
        assert_eq!(session.status(), Status::Error);

        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(probe.open_count(), 1);
        assert_eq!(session.status(), Status::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_alone_does_not_reconnect() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        session.on_error(move |err| s.lock().unwrap().push(Arc::clone(err)));

        session.open().await.unwrap();
        probe
            .sink()
            .error(TransportError::ReceiveFailed("reset by peer".into()));
        tokio::time::sleep(Duration::from_secs(60)).await;

        // The session stays in `error` until the transport also reports a close.
        let state = session.snapshot().await.unwrap();
        assert_eq!(probe.open_count(), 1);
        assert_eq!(state.status, Status::Error);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(Arc::ptr_eq(&seen[0], state.error.as_ref().unwrap()));
        assert!(matches!(*seen[0], TransportError::ReceiveFailed(ref m) if m == "reset by peer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_close_reconnects_once() {
        let (session, probe) = scripted(
            test_config(),
            Capability::Bidirectional,
            [Step::Connect, Step::Connect],
        );

        session.open().await.unwrap();
        let sink = probe.sink();
        sink.error(TransportError::ReceiveFailed("reset".into()));
        sink.closed(None);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(probe.open_count(), 2);
        assert_eq!(session.status(), Status::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_on_receive_only_transport() {
        let (session, probe) = scripted(test_config(), Capability::ReceiveOnly, [Step::Connect]);

        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Capability { kind: TransportKind::Websocket, operation: "send" }
        ));

        session.open().await.unwrap();
        session.snapshot().await.unwrap();
        let err = session.send("hello").await.unwrap_err();
        assert!(err.is_capability());
        assert!(probe.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_open() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, []);

        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(err, SessionError::NotOpen(Status::Idle)));
        assert!(probe.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_when_open() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        session.open().await.unwrap();
        session.snapshot().await.unwrap();

        session.send("ping").await.unwrap();
        session.send(serde_json::json!({"op": "sub"})).await.unwrap();

        let sent = probe.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Payload::Text("ping".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_reported() {
        let probe = Arc::new(Probe::default());
        let adapter = ScriptedAdapter {
            capability: Capability::Bidirectional,
            script: VecDeque::from([Step::Connect]),
            probe: Arc::clone(&probe),
            fail_send: true,
        };
        let session = Session::new(test_config(), Box::new(adapter)).unwrap();
        let log = record(&session);

        session.open().await.unwrap();
        session.snapshot().await.unwrap();
        let err = session.send("ping").await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(ref e) if matches!(**e, TransportError::SendFailed(_))));
        let state = session.snapshot().await.unwrap();
        assert_eq!(state.status, Status::Open);
        assert!(state.error.is_some());
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_keeps_latest_messages() {
        let (session, probe) = scripted(
            test_config().with_buffer_limit(500),
            Capability::ReceiveOnly,
            [Step::Connect],
        );
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        session.on_message(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        session.open().await.unwrap();
        let sink = probe.sink();
        for i in 1..=501u64 {
            sink.message(serde_json::json!(i));
        }

        let state = session.snapshot().await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 501);
        assert_eq!(state.messages.len(), 500);
        let ids: Vec<u64> = state
            .messages
            .iter()
            .map(|p| p.as_json().and_then(|v| v.as_u64()).unwrap())
            .collect();
        assert_eq!(ids, (2..=501).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_open_matches_status_at_every_transition() {
        let (session, probe) = scripted(
            test_config(),
            Capability::Bidirectional,
            [Step::Fail, Step::Connect, Step::Connect],
        );
        let checked = Arc::new(AtomicUsize::new(0));

        let observer = session.downgrade();
        let c = Arc::clone(&checked);
        session.on_status(move |status| {
            let state = observer.state();
            assert_eq!(state.status, status);
            assert_eq!(state.is_open(), status == Status::Open);
            c.fetch_add(1, Ordering::SeqCst);
        });

        session.open().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        probe.sink().closed(None);
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.close().await.unwrap();

        // connecting, error, connecting, open, closed, connecting, open, closing, closed
        assert_eq!(checked.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_open_then_queued_close() {
        let (session, probe) = scripted(
            test_config(),
            Capability::Bidirectional,
            [Step::ConnectAfter(Duration::from_millis(50))],
        );
        let log = record(&session);

        let (opened, closed) = tokio::join!(session.open(), session.close());
        opened.unwrap();
        closed.unwrap();

        assert_eq!(
            statuses(&log),
            vec!["connecting", "open", "closing", "closed"]
        );
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), Status::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_close_are_discarded() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        session.open().await.unwrap();
        let stale = probe.sink();

        session.close().await.unwrap();
        stale.message("late");
        stale.opened();
        stale.closed(None);

        let state = session.snapshot().await.unwrap();
        assert!(state.messages.is_empty());
        assert_eq!(state.status, Status::Closed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_counts_as_failure() {
        let config = test_config()
            .with_auto_reconnect(false)
            .with_open_timeout(Duration::from_secs(1));
        let (session, probe) = scripted(config, Capability::Bidirectional, [Step::Hang]);

        session.open().await.unwrap();
        let state = session.snapshot().await.unwrap();

        assert_eq!(state.status, Status::Error);
        assert!(matches!(state.error.as_deref(), Some(TransportError::Timeout)));
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_while_open_is_ignored() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        session.open().await.unwrap();
        session.snapshot().await.unwrap();

        session.open().await.unwrap();
        assert_eq!(probe.open_count(), 1);
        assert!(session.state().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_removes_listener() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = session.on_message(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        session.open().await.unwrap();
        probe.sink().message("one");
        session.snapshot().await.unwrap();
        assert!(session.off(EventKind::Message, sub.id()));
        probe.sink().message("two");
        session.snapshot().await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_closes_transport() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        session.open().await.unwrap();
        drop(session);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weak_handle_in_listener_does_not_keep_session_alive() {
        let (session, probe) = scripted(test_config(), Capability::Bidirectional, [Step::Connect]);
        let upgraded = Arc::new(AtomicUsize::new(0));

        let weak = session.downgrade();
        let u = Arc::clone(&upgraded);
        session.on_status(move |_| {
            if weak.upgrade().is_some() {
                u.fetch_add(1, Ordering::SeqCst);
            }
        });
        let observer = session.downgrade();

        session.open().await.unwrap();
        session.snapshot().await.unwrap();
        // connecting, open
        assert_eq!(upgraded.load(Ordering::SeqCst), 2);

        drop(session);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert!(observer.upgrade().is_none());
        assert_eq!(observer.state().status, Status::Closed);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_adapter() {
        let probe = Arc::new(Probe::default());
        let adapter = ScriptedAdapter {
            capability: Capability::Bidirectional,
            script: VecDeque::new(),
            probe,
            fail_send: false,
        };
        let config = SessionConfig::new(TransportKind::Sse, "http://test.invalid/events");
        let err = Session::new(config, Box::new(adapter)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }
}
