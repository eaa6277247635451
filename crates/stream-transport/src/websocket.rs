//! WebSocket adapter.
//!
//! Bidirectional, using tokio-tungstenite. The connection is split: a reader
//! task pumps frames into the session while the adapter keeps the write half
//! for `send` and `close`.
//!
//! `wss://` addresses need the `websocket-tls` feature.

use crate::reader::ReaderTask;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tenvis_stream_core::{
    AdapterSink, Capability, Payload, SessionConfig, SessionError, TransportAdapter,
    TransportError, TransportKind,
};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport.
pub struct WebSocketAdapter {
    address: String,
    protocols: Option<HeaderValue>,
    ws_config: WebSocketConfig,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: ReaderTask,
}

impl WebSocketAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-WebSocket address or
    /// subprotocol names that cannot be sent in a header.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let address = config.address.trim();
        if !(address.starts_with("ws://") || address.starts_with("wss://")) {
            return Err(SessionError::InvalidConfig(format!(
                "websocket address must use ws:// or wss://, got {address:?}"
            )));
        }

        let options = &config.websocket;
        let protocols = if options.protocols.is_empty() {
            None
        } else {
            let joined = options.protocols.join(", ");
            Some(HeaderValue::from_str(&joined).map_err(|e| {
                SessionError::InvalidConfig(format!("invalid websocket protocols {joined:?}: {e}"))
            })?)
        };

        let mut ws_config = WebSocketConfig::default();
        if let Some(limit) = options.max_message_size {
            ws_config.max_message_size = Some(limit);
            ws_config.max_frame_size = Some(limit);
        }

        Ok(Self {
            address: address.to_string(),
            protocols,
            ws_config,
            writer: None,
            reader: ReaderTask::default(),
        })
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        let result = match self.writer.take() {
            Some(mut writer) => match writer.close().await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(TransportError::Other(format!("Failed to close: {e}"))),
            },
            None => Ok(()),
        };
        self.reader.stop().await;
        result
    }
}

async fn pump(mut stream: SplitStream<WsStream>, sink: AdapterSink) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => sink.message(Payload::from_text(text)),
            Ok(Message::Binary(data)) => sink.message(Bytes::from(data)),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.into_owned())
                    .filter(|reason| !reason.is_empty());
                debug!(reason = ?reason, "Received close frame");
                sink.closed(reason);
                return;
            }
            // Pings are answered by tungstenite itself
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                let reason = e.to_string();
                sink.error(TransportError::ReceiveFailed(reason.clone()));
                sink.closed(Some(reason));
                return;
            }
        }
    }

    debug!("WebSocket stream ended");
    sink.closed(None);
}

#[async_trait]
impl TransportAdapter for WebSocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    fn capability(&self) -> Capability {
        Capability::Bidirectional
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        if let Err(e) = self.release().await {
            debug!(error = %e, "Releasing previous connection failed");
        }

        let mut request = self
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        if let Some(protocols) = &self.protocols {
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocols.clone());
        }

        let (stream, response) = connect_async_with_config(request, Some(self.ws_config), false)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        debug!(
            address = %self.address,
            status = %response.status(),
            protocol = ?response.headers().get("Sec-WebSocket-Protocol"),
            "WebSocket handshake completed"
        );

        let (writer, reader) = stream.split();
        self.writer = Some(writer);
        sink.opened();
        self.reader.spawn(pump(reader, sink));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.release().await
    }

    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        let message = match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Json(value) => Message::Text(value.to_string()),
            Payload::Binary(data) => Message::Binary(data.to_vec()),
        };
        writer
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_applied() {
        let mut config = SessionConfig::new(TransportKind::Websocket, "ws://127.0.0.1:9/ws");
        config.websocket.protocols = vec!["pulse.v1".into(), "json".into()];
        config.websocket.max_message_size = Some(64 * 1024);

        let adapter = WebSocketAdapter::new(&config).unwrap();
        assert_eq!(adapter.protocols.as_ref().unwrap(), "pulse.v1, json");
        assert_eq!(adapter.ws_config.max_message_size, Some(64 * 1024));
        assert_eq!(adapter.capability(), Capability::Bidirectional);
    }

    #[test]
    fn test_rejects_http_address() {
        let config = SessionConfig::new(TransportKind::Websocket, "http://127.0.0.1/ws");
        assert!(matches!(
            WebSocketAdapter::new(&config),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_open() {
        let config = SessionConfig::new(TransportKind::Websocket, "ws://127.0.0.1:9/ws");
        let mut adapter = WebSocketAdapter::new(&config).unwrap();
        let err = adapter.send(Payload::from("hi")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
