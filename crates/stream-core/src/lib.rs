//! # tenvis-stream-core
//!
//! Transport-agnostic session controller for Pulse streaming clients.
//!
//! This crate owns everything that does not touch the network:
//!
//! - **Session** - Lifecycle state machine with reconnect and backoff
//! - **TransportAdapter** - Contract every concrete transport implements
//! - **EventDispatcher** - Ordered, panic-isolated listener fan-out
//! - **MessageBuffer** - Bounded history of received messages
//! - **SessionStore** - Watch-channel binding for reactive consumers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ commands ┌──────────────┐  open/close/send  ┌─────────────┐
//! │   Session   │─────────▶│  Controller  │──────────────────▶│   Adapter   │
//! │  (handle)   │          │    (task)    │◀──────────────────│             │
//! └─────────────┘          └──────────────┘    AdapterSink    └─────────────┘
//!        ▲                        │
//!        │ state()                ▼
//! ┌─────────────┐          ┌──────────────┐
//! │ SessionState│◀─────────│  Dispatcher  │──▶ listeners / SessionStore
//! └─────────────┘          └──────────────┘
//! ```
//!
//! Concrete adapters live in `tenvis-stream-transport`.

pub mod adapter;
pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod metrics;
pub mod payload;
pub mod session;
pub mod state;
pub mod store;

pub use adapter::{AdapterSink, Capability, TransportAdapter};
pub use backoff::Backoff;
pub use config::{
    BackoffConfig, HlsOptions, HttpMethod, HttpStreamOptions, LongPollingOptions, SessionConfig,
    SseOptions, TransportKind, WebRtcOptions, WebSocketOptions,
};
pub use dispatcher::{DispatchReport, EventDispatcher, Listener, Subscription, SubscriptionId};
pub use error::{SessionError, TransportError};
pub use event::{EventKind, SessionEvent};
pub use payload::Payload;
pub use session::{Session, WeakSession};
pub use state::{MessageBuffer, SessionState, Status};
pub use store::{SessionStore, StoreSnapshot};
