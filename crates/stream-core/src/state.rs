//! Session status, message buffer and state snapshots.

use crate::error::TransportError;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Constructed, never opened.
    Idle,
    /// An adapter `open()` is in flight.
    Connecting,
    /// The transport reported a successful open.
    Open,
    /// A caller-initiated close is in progress.
    Closing,
    /// Closed, either by the caller or by the transport.
    Closed,
    /// The last attempt or connection failed.
    Error,
}

impl Status {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Connecting => "connecting",
            Status::Open => "open",
            Status::Closing => "closing",
            Status::Closed => "closed",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded FIFO of received messages.
///
/// Inserting beyond the limit evicts the oldest entries.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    messages: VecDeque<Payload>,
    limit: usize,
}

impl MessageBuffer {
    /// Create an empty buffer holding at most `limit` messages.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Append a message, returning how many old messages were evicted.
    pub fn push(&mut self, message: Payload) -> usize {
        self.messages.push_back(message);

        let overflow = self.messages.len().saturating_sub(self.limit);
        self.messages.drain(..overflow);
        overflow
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Payload> {
        self.messages.iter()
    }

    /// Most recent message.
    #[must_use]
    pub fn last(&self) -> Option<&Payload> {
        self.messages.back()
    }

    /// Copy the messages out, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Payload> {
        self.messages.iter().cloned().collect()
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Snapshot of a session's observable state.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current lifecycle phase.
    pub status: Status,
    /// Last recorded error, cleared by a successful open.
    pub error: Option<Arc<TransportError>>,
    /// Received messages, oldest first.
    pub messages: MessageBuffer,
    /// Reconnect attempts since the last successful open.
    pub retries: u32,
    /// Reason given by the transport for the last unsolicited close.
    pub last_close_reason: Option<String>,
}

impl SessionState {
    pub(crate) fn new(buffer_limit: usize) -> Self {
        Self {
            status: Status::Idle,
            error: None,
            messages: MessageBuffer::new(buffer_limit),
            retries: 0,
            last_close_reason: None,
        }
    }

    /// Whether the session is open. Always `status == Status::Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }
}
