//! # tenvis-stream-transport
//!
//! Concrete transport adapters for `tenvis-stream-core` sessions.
//!
//! Each transport sits behind a cargo feature:
//!
//! - **websocket** - Full-duplex WebSocket (`tokio-tungstenite`)
//! - **http** - SSE, newline-delimited HTTP streams, long polling and HLS
//!   playlists (`reqwest`)
//! - **webrtc** - Data channels from a host-supplied [`webrtc::PeerConnector`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tenvis_stream_core::{SessionConfig, TransportKind};
//!
//! let config = SessionConfig::new(TransportKind::Sse, "https://example.com/events");
//! let session = tenvis_stream_transport::connect(config)?;
//! session.on_message(|payload| println!("{payload:?}"));
//! session.open().await?;
//! ```

pub mod registry;

#[cfg(feature = "http")]
mod decode;
#[cfg(feature = "http")]
mod request;

#[cfg(feature = "http")]
pub mod hls;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod long_polling;
#[cfg(feature = "http")]
pub mod sse;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "webrtc")]
pub mod webrtc;

mod reader;

pub use registry::{connect, SessionBuilder};

#[cfg(feature = "http")]
pub use hls::HlsAdapter;
#[cfg(feature = "http")]
pub use http::HttpStreamAdapter;
#[cfg(feature = "http")]
pub use long_polling::LongPollingAdapter;
#[cfg(feature = "http")]
pub use sse::SseAdapter;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketAdapter;
#[cfg(feature = "webrtc")]
pub use webrtc::{DataChannel, PeerConnector, WebRtcAdapter};
