//! Transport selection.
//!
//! Maps a configured [`TransportKind`] to its adapter. Kinds whose cargo
//! feature is disabled report [`SessionError::Unsupported`].

use tenvis_stream_core::{Session, SessionConfig, SessionError, TransportAdapter, TransportKind};
use tracing::debug;

#[cfg(feature = "webrtc")]
use crate::webrtc::PeerConnector;
#[cfg(feature = "webrtc")]
use std::sync::Arc;

/// Builds a [`Session`] with the adapter its configuration asks for.
pub struct SessionBuilder {
    config: SessionConfig,
    #[cfg(feature = "webrtc")]
    peer_connector: Option<Arc<dyn PeerConnector>>,
}

impl SessionBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "webrtc")]
            peer_connector: None,
        }
    }

    /// Supply the signalling collaborator the WebRTC transport needs.
    #[cfg(feature = "webrtc")]
    #[must_use]
    pub fn peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_connector = Some(connector);
        self
    }

    /// Kinds compiled into this build.
    #[must_use]
    pub fn available() -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| is_compiled(*kind))
            .collect()
    }

    /// Construct the adapter and spawn the session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidConfig`] if the configuration or the
    ///   transport's own options fail validation.
    /// - [`SessionError::Unsupported`] if the kind is compiled out, or is
    ///   WebRTC without a peer connector.
    pub fn build(self) -> Result<Session, SessionError> {
        self.config.validate()?;
        let adapter = self.adapter()?;
        debug!(
            transport = %self.config.kind,
            capability = ?adapter.capability(),
            "Adapter selected"
        );
        Session::new(self.config, adapter)
    }

    fn adapter(&self) -> Result<Box<dyn TransportAdapter>, SessionError> {
        let config = &self.config;
        let adapter: Box<dyn TransportAdapter> = match config.kind {
            #[cfg(feature = "websocket")]
            TransportKind::Websocket => Box::new(crate::websocket::WebSocketAdapter::new(config)?),
            #[cfg(feature = "http")]
            TransportKind::Sse => Box::new(crate::sse::SseAdapter::new(config)?),
            #[cfg(feature = "http")]
            TransportKind::Http => Box::new(crate::http::HttpStreamAdapter::new(config)?),
            #[cfg(feature = "http")]
            TransportKind::LongPolling => {
                Box::new(crate::long_polling::LongPollingAdapter::new(config)?)
            }
            #[cfg(feature = "http")]
            TransportKind::Hls => Box::new(crate::hls::HlsAdapter::new(config)?),
            #[cfg(feature = "webrtc")]
            TransportKind::Webrtc => match &self.peer_connector {
                Some(connector) => Box::new(crate::webrtc::WebRtcAdapter::new(
                    config,
                    Arc::clone(connector),
                )?),
                None => return Err(SessionError::Unsupported(TransportKind::Webrtc)),
            },
            // Compiled out
            #[allow(unreachable_patterns)]
            kind => return Err(SessionError::Unsupported(kind)),
        };
        Ok(adapter)
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn is_compiled(kind: TransportKind) -> bool {
    match kind {
        TransportKind::Websocket => cfg!(feature = "websocket"),
        TransportKind::Sse
        | TransportKind::Http
        | TransportKind::LongPolling
        | TransportKind::Hls => cfg!(feature = "http"),
        TransportKind::Webrtc => cfg!(feature = "webrtc"),
    }
}

/// Build a session for `config`.
///
/// # Errors
///
/// See [`SessionBuilder::build`].
pub fn connect(config: SessionConfig) -> Result<Session, SessionError> {
    SessionBuilder::new(config).build()
}
