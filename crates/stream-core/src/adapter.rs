//! Transport adapter contract.
//!
//! An adapter binds one transport mechanism to the session controller. The
//! controller calls [`TransportAdapter::open`], [`TransportAdapter::close`]
//! and, for bidirectional transports, [`TransportAdapter::send`]. The adapter
//! reports what happens on the wire through the [`AdapterSink`] it was given
//! for that connection attempt.
//!
//! Adapters own at most one native connection handle at a time and must
//! release it on `close()` and before reopening.

use crate::config::TransportKind;
use crate::error::TransportError;
use crate::payload::Payload;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

/// Whether a transport can carry outbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Supports `send`.
    Bidirectional,
    /// Server-to-client only.
    ReceiveOnly,
}

impl Capability {
    /// Whether `send` is available.
    #[must_use]
    pub fn can_send(self) -> bool {
        matches!(self, Capability::Bidirectional)
    }
}

/// A transport implementation.
#[async_trait]
pub trait TransportAdapter: Send {
    /// Transport kind this adapter implements.
    fn kind(&self) -> TransportKind;

    /// Whether the transport can send.
    fn capability(&self) -> Capability {
        Capability::ReceiveOnly
    }

    /// Start connecting.
    ///
    /// Returning `Err` is an open failure. Returning `Ok` means the attempt is
    /// under way; the adapter reports success with [`AdapterSink::opened`],
    /// possibly before this method returns.
    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError>;

    /// Release the connection. No events may be reported after this resolves.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Send a payload over a bidirectional transport.
    async fn send(&mut self, _payload: Payload) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(self.kind()))
    }
}

/// Something an adapter observed on its connection.
#[derive(Debug)]
pub(crate) enum AdapterSignal {
    Opened,
    Closed(Option<String>),
    Failed(TransportError),
    Message(Payload),
}

/// An adapter signal stamped with the connection attempt that produced it.
#[derive(Debug)]
pub(crate) struct AdapterEvent {
    pub(crate) epoch: u64,
    pub(crate) signal: AdapterSignal,
}

/// The controller's callback surface for one connection attempt.
///
/// Cheap to clone; adapters hand copies to their reader tasks. Events from a
/// superseded or closed attempt are discarded by the controller.
#[derive(Debug, Clone)]
pub struct AdapterSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<AdapterEvent>,
}

impl AdapterSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<AdapterEvent>) -> Self {
        Self { epoch, tx }
    }

    /// Connection attempt this sink belongs to.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the session is still listening.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }

    /// The transport is open.
    pub fn opened(&self) {
        self.emit(AdapterSignal::Opened);
    }

    /// The transport closed without being asked to.
    pub fn closed(&self, reason: Option<String>) {
        self.emit(AdapterSignal::Closed(reason));
    }

    /// The transport reported a failure.
    pub fn error(&self, err: TransportError) {
        self.emit(AdapterSignal::Failed(err));
    }

    /// A message arrived.
    pub fn message(&self, payload: impl Into<Payload>) {
        self.emit(AdapterSignal::Message(payload.into()));
    }

    fn emit(&self, signal: AdapterSignal) {
        let event = AdapterEvent {
            epoch: self.epoch,
            signal,
        };
        if self.tx.send(event).is_err() {
            trace!(epoch = self.epoch, "Session gone, dropping adapter event");
        }
    }
}
