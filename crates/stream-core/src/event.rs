//! Events emitted by a session.

use crate::error::TransportError;
use crate::payload::Payload;
use crate::state::Status;
use std::fmt;
use std::sync::Arc;

/// Event kinds subscribers can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The transport opened.
    Open,
    /// The transport closed on its own.
    Close,
    /// A transport failure was recorded.
    Error,
    /// A message arrived.
    Message,
    /// The session status changed.
    Status,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [EventKind; 5] = [
        EventKind::Open,
        EventKind::Close,
        EventKind::Error,
        EventKind::Message,
        EventKind::Status,
    ];

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::Status => "status",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event together with its payload.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transport opened.
    Open,
    /// The transport closed, with an optional reason.
    Close(Option<String>),
    /// A transport failure, passed through intact.
    Error(Arc<TransportError>),
    /// A received message.
    Message(Payload),
    /// The new status.
    Status(Status),
}

impl SessionEvent {
    /// Kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Open => EventKind::Open,
            SessionEvent::Close(_) => EventKind::Close,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::Message(_) => EventKind::Message,
            SessionEvent::Status(_) => EventKind::Status,
        }
    }
}
