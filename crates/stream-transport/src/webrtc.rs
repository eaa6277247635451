//! WebRTC data channel adapter.
//!
//! Signalling and peer negotiation are left to the host application, which
//! supplies a [`PeerConnector`]. The adapter asks it for a [`DataChannel`]
//! with the configured label and drives the session from it.

use crate::reader::ReaderTask;
use async_trait::async_trait;
use std::sync::Arc;
use tenvis_stream_core::{
    AdapterSink, Capability, Payload, SessionConfig, SessionError, TransportAdapter,
    TransportError, TransportKind,
};
use tracing::{debug, warn};

/// An open data channel.
///
/// Methods take `&self` so the adapter can send while its reader task is
/// waiting in `recv`.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Next inbound message. `None` once the channel has closed.
    async fn recv(&self) -> Option<Result<Payload, TransportError>>;

    /// Send a message.
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Produces data channels to a peer.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Negotiate a connection to `address` and open a channel named `label`.
    async fn connect(
        &self,
        address: &str,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError>;
}

/// WebRTC data channel transport.
pub struct WebRtcAdapter {
    address: String,
    label: String,
    connector: Arc<dyn PeerConnector>,
    channel: Option<Arc<dyn DataChannel>>,
    reader: ReaderTask,
}

impl WebRtcAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if the channel label is empty.
    pub fn new(
        config: &SessionConfig,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, SessionError> {
        if config.webrtc.label.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "webrtc.label cannot be empty".into(),
            ));
        }

        Ok(Self {
            address: config.address.clone(),
            label: config.webrtc.label.clone(),
            connector,
            channel: None,
            reader: ReaderTask::default(),
        })
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        self.reader.stop().await;
        match self.channel.take() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransportAdapter for WebRtcAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Webrtc
    }

    fn capability(&self) -> Capability {
        Capability::Bidirectional
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        if let Err(e) = self.release().await {
            debug!(error = %e, "Releasing previous channel failed");
        }

        let channel = self.connector.connect(&self.address, &self.label).await?;
        debug!(peer = %self.address, label = %self.label, "Data channel open");
        sink.opened();

        let inbound = Arc::clone(&channel);
        self.channel = Some(channel);
        self.reader.spawn(async move {
            while let Some(next) = inbound.recv().await {
                match next {
                    Ok(payload) => sink.message(payload),
                    Err(e) => {
                        warn!(error = %e, "Data channel error");
                        sink.error(e);
                    }
                }
            }
            debug!("Data channel closed");
            sink.closed(None);
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.release().await
    }

    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        match &self.channel {
            Some(channel) => channel.send(payload).await,
            None => Err(TransportError::ConnectionClosed),
        }
    }
}
