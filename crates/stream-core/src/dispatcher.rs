//! Event dispatch table.
//!
//! Each [`EventKind`] has an ordered list of listeners. Dispatch snapshots the
//! list before calling anything, so listeners may subscribe or unsubscribe
//! (themselves or others) while a dispatch is running; the change applies to
//! the next dispatch.

use crate::event::{EventKind, SessionEvent};
use crate::metrics;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, trace};

/// A listener callback.
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
}

/// Per-kind listener lists with synchronous fan-out.
#[derive(Default)]
pub struct EventDispatcher {
    registry: Mutex<Registry>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Listeners never run under this lock, so a poisoned guard still holds
        // a consistent registry.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a listener for `kind`. Listeners run in subscription order.
    pub fn subscribe<F>(self: &Arc<Self>, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        drop(registry);

        debug!(event = %kind, subscription = %id, "Listener subscribed");

        Subscription {
            kind,
            id,
            dispatcher: Arc::downgrade(self),
        }
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was subscribed.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.listeners.get_mut(&kind) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        drop(registry);

        if removed {
            debug!(event = %kind, subscription = %id, "Listener unsubscribed");
        }
        removed
    }

    /// Number of listeners for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Call every listener currently subscribed to the event's kind.
    ///
    /// A panicking listener is logged and counted; the remaining listeners
    /// still run.
    pub fn dispatch(&self, event: &SessionEvent) -> DispatchReport {
        let kind = event.kind();
        let snapshot: Vec<(SubscriptionId, Listener)> = self
            .registry()
            .listeners
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        trace!(event = %kind, listeners = snapshot.len(), "Dispatching");

        let mut report = DispatchReport::default();
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => report.delivered += 1,
                Err(cause) => {
                    report.failed += 1;
                    metrics::record_listener_panic(kind);
                    error!(
                        event = %kind,
                        subscription = %id,
                        "Listener panicked: {}",
                        panic_message(cause.as_ref())
                    );
                }
            }
        }
        report
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let mut counts: Vec<_> = registry
            .listeners
            .iter()
            .map(|(kind, listeners)| (kind.as_str(), listeners.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("EventDispatcher")
            .field("listeners", &counts)
            .finish()
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by [`EventDispatcher::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: EventKind,
    id: SubscriptionId,
    dispatcher: Weak<EventDispatcher>,
}

impl Subscription {
    /// Event kind this subscription listens to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Subscription identifier, usable with `off`.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Safe to call more than once and from inside a
    /// listener.
    pub fn unsubscribe(&self) -> bool {
        self.dispatcher
            .upgrade()
            .is_some_and(|dispatcher| dispatcher.unsubscribe(self.kind, self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &'static str| -> Listener {
                let log = Arc::clone(&log);
                Arc::new(move |_: &SessionEvent| log.lock().unwrap().push(name))
            }
        };
        (log, make)
    }

    #[test]
    fn test_dispatch_in_subscription_order() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();

        for name in ["first", "second", "third"] {
            let listener = make(name);
            dispatcher.subscribe(EventKind::Open, move |e| listener(e));
        }
        let other = make("status");
        dispatcher.subscribe(EventKind::Status, move |e| other(e));

        let report = dispatcher.dispatch(&SessionEvent::Open);
        assert_eq!(report, DispatchReport { delivered: 3, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        dispatcher.subscribe(EventKind::Status, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.subscribe(EventKind::Status, |_| panic!("listener blew up"));
        let c = Arc::clone(&calls);
        dispatcher.subscribe(EventKind::Status, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let report = dispatcher.dispatch(&SessionEvent::Status(Status::Open));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The dispatcher stays usable afterwards
        let report = dispatcher.dispatch(&SessionEvent::Status(Status::Closed));
        assert_eq!(report.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_applies_next_time() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let later: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        // The first listener removes itself and the second one.
        let own: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (own_slot, later_slot, c) = (Arc::clone(&own), Arc::clone(&later), Arc::clone(&calls));
        let first = dispatcher.subscribe(EventKind::Message, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own_slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            if let Some(sub) = later_slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *own.lock().unwrap() = Some(first);

        let c = Arc::clone(&calls);
        let second = dispatcher.subscribe(EventKind::Message, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        *later.lock().unwrap() = Some(second);

        let report = dispatcher.dispatch(&SessionEvent::Message("a".into()));
        assert_eq!(report.delivered, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.listener_count(EventKind::Message), 0);

        let report = dispatcher.dispatch(&SessionEvent::Message("b".into()));
        assert_eq!(report.delivered, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribe_during_dispatch_applies_next_time() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&dispatcher);
        let c = Arc::clone(&calls);
        dispatcher.subscribe(EventKind::Open, move |_| {
            if let Some(dispatcher) = weak.upgrade() {
                let c = Arc::clone(&c);
                dispatcher.subscribe(EventKind::Open, move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        dispatcher.dispatch(&SessionEvent::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(EventKind::Open), 2);

        dispatcher.dispatch(&SessionEvent::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe(EventKind::Close, |_| {});
        assert_eq!(dispatcher.listener_count(EventKind::Close), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!dispatcher.unsubscribe(EventKind::Close, sub.id()));
        assert!(!dispatcher.unsubscribe(EventKind::Error, sub.id()));
        assert_eq!(dispatcher.listener_count(EventKind::Close), 0);
    }

    #[test]
    fn test_subscription_outliving_dispatcher() {
        let dispatcher = EventDispatcher::new();
        let sub = dispatcher.subscribe(EventKind::Open, |_| {});
        drop(dispatcher);
        assert!(!sub.unsubscribe());
    }
}
