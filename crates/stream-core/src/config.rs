//! Session configuration.
//!
//! A [`SessionConfig`] is built once and never mutated by the session. It can
//! be constructed programmatically with the `with_*` methods or deserialized
//! from TOML/JSON:
//!
//! ```toml
//! kind = "websocket"
//! address = "ws://127.0.0.1:8080/ws"
//! buffer_limit = 500
//!
//! [backoff]
//! base_ms = 100
//! jitter = false
//!
//! [websocket]
//! protocols = ["pulse.v1"]
//! ```

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport mechanisms a session can run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Full-duplex WebSocket.
    Websocket,
    /// Server-sent events.
    Sse,
    /// Newline-delimited streaming HTTP body.
    Http,
    /// Repeated HTTP requests.
    LongPolling,
    /// HLS playlist tracking.
    Hls,
    /// WebRTC data channel.
    Webrtc,
}

impl TransportKind {
    /// Every known kind.
    pub const ALL: [TransportKind; 6] = [
        TransportKind::Websocket,
        TransportKind::Sse,
        TransportKind::Http,
        TransportKind::LongPolling,
        TransportKind::Hls,
        TransportKind::Webrtc,
    ];

    /// Canonical name used in configuration files and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
            TransportKind::LongPolling => "long-polling",
            TransportKind::Hls => "hls",
            TransportKind::Webrtc => "webrtc",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SessionError::UnknownTransport(s.to_string()))
    }
}

/// Reconnect backoff tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    /// Upper bound for any delay, in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Growth factor applied per attempt.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Scale each delay by a uniform random value in `[0, 1)`.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

/// WebSocket options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSocketOptions {
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Largest inbound message accepted, in bytes.
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

/// Server-sent events options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SseOptions {
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Send credential headers (`authorization`, `cookie`) from `headers`.
    #[serde(default)]
    pub with_credentials: bool,
}

/// HTTP method for streaming requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
}

/// Streaming HTTP options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpStreamOptions {
    /// Request method.
    #[serde(default)]
    pub method: HttpMethod,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, sent with `POST`.
    #[serde(default)]
    pub body: Option<String>,
}

/// Long-polling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongPollingOptions {
    /// Pause between polls, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// HLS playlist options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HlsOptions {
    /// Override the live playlist refresh interval, in milliseconds.
    ///
    /// Defaults to the playlist's target duration.
    #[serde(default)]
    pub refresh_ms: Option<u64>,
}

/// WebRTC data channel options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebRtcOptions {
    /// Data channel label.
    #[serde(default = "default_channel_label")]
    pub label: String,
}

/// Immutable configuration for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport to use.
    pub kind: TransportKind,

    /// Target address (URL, or peer identifier for WebRTC).
    pub address: String,

    /// Maximum number of buffered messages.
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,

    /// Reconnect after failures and unsolicited closes.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Maximum reconnect attempts since the last successful open.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for a single adapter `open()`, in milliseconds.
    #[serde(default = "default_open_timeout")]
    pub open_timeout_ms: u64,

    /// Backoff tuning.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// WebSocket options.
    #[serde(default)]
    pub websocket: WebSocketOptions,

    /// Server-sent events options.
    #[serde(default)]
    pub sse: SseOptions,

    /// Streaming HTTP options.
    #[serde(default)]
    pub http: HttpStreamOptions,

    /// Long-polling options.
    #[serde(default)]
    pub long_polling: LongPollingOptions,

    /// HLS options.
    #[serde(default)]
    pub hls: HlsOptions,

    /// WebRTC options.
    #[serde(default)]
    pub webrtc: WebRtcOptions,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_base_ms() -> u64 {
    500
}

fn default_max_ms() -> u64 {
    15_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_buffer_limit() -> usize {
    500
}

fn default_max_retries() -> u32 {
    10
}

fn default_open_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_poll_interval() -> u64 {
    3_000
}

fn default_channel_label() -> String {
    "data".to_string()
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            factor: default_factor(),
            jitter: true,
        }
    }
}

impl Default for LongPollingOptions {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for WebRtcOptions {
    fn default() -> Self {
        Self {
            label: default_channel_label(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default tuning.
    #[must_use]
    pub fn new(kind: TransportKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            buffer_limit: default_buffer_limit(),
            auto_reconnect: true,
            max_retries: default_max_retries(),
            open_timeout_ms: default_open_timeout(),
            backoff: BackoffConfig::default(),
            websocket: WebSocketOptions::default(),
            sse: SseOptions::default(),
            http: HttpStreamOptions::default(),
            long_polling: LongPollingOptions::default(),
            hls: HlsOptions::default(),
            webrtc: WebRtcOptions::default(),
        }
    }

    /// Create a configuration from a kind name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTransport`] if the name is not a known kind.
    pub fn parse(kind: &str, address: impl Into<String>) -> Result<Self, SessionError> {
        Ok(Self::new(kind.parse()?, address))
    }

    /// Set the message buffer limit.
    #[must_use]
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Enable or disable automatic reconnects.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff tuning.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the adapter open timeout.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Adapter open timeout.
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Check the fields the controller depends on.
    ///
    /// Transport-specific sections are validated by the adapter for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.address.trim().is_empty() {
            return Err(SessionError::InvalidConfig("address cannot be empty".into()));
        }
        if self.buffer_limit == 0 {
            return Err(SessionError::InvalidConfig(
                "buffer_limit must be at least 1".into(),
            ));
        }
        if self.open_timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "open_timeout_ms must be positive".into(),
            ));
        }
        self.backoff.validate()
    }
}

impl BackoffConfig {
    /// Fixed delays with no jitter, mostly useful in tests.
    #[must_use]
    pub fn fixed(base_ms: u64, max_ms: u64, factor: f64) -> Self {
        Self {
            base_ms,
            max_ms,
            factor,
            jitter: false,
        }
    }

    /// Check the tuning constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if `max_ms < base_ms` or the
    /// factor is not a finite value above 1.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_ms < self.base_ms {
            return Err(SessionError::InvalidConfig(format!(
                "backoff max_ms ({}) is below base_ms ({})",
                self.max_ms, self.base_ms
            )));
        }
        if !self.factor.is_finite() || self.factor <= 1.0 {
            return Err(SessionError::InvalidConfig(format!(
                "backoff factor must be greater than 1, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}
