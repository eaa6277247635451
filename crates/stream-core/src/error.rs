//! Error taxonomy for sessions and transport adapters.

use crate::config::TransportKind;
use crate::state::Status;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by transport adapters.
///
/// These reach subscribers through the `error` event and are retained in
/// the session state, so they are shared as `Arc<TransportError>`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Opening the transport timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The transport could not be established.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The remote side violated the transport's framing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}")]
    Http {
        /// Response status code.
        status: u16,
    },

    /// The transport cannot perform the requested operation.
    #[error("Operation not supported by {0} transport")]
    Unsupported(TransportKind),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Errors returned to callers of the session API.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The configuration named a transport kind that does not exist.
    #[error("Unknown transport kind: {0}")]
    UnknownTransport(String),

    /// The configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport kind is known but unavailable in this build or setup.
    #[error("Transport {0} is not available")]
    Unsupported(TransportKind),

    /// The active transport cannot perform the operation.
    #[error("{kind} transport does not support {operation}")]
    Capability {
        /// Active transport kind.
        kind: TransportKind,
        /// Rejected operation.
        operation: &'static str,
    },

    /// The operation needs an open connection.
    #[error("Session is not open (status: {0})")]
    NotOpen(Status),

    /// The transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(Arc<TransportError>),

    /// The session controller has shut down.
    #[error("Session terminated")]
    Terminated,
}

impl SessionError {
    /// Whether this is a capability error (never retried).
    #[must_use]
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            SessionError::Capability { .. } | SessionError::Unsupported(_)
        )
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(Arc::new(err))
    }
}
