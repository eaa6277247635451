//! Server-sent events adapter.
//!
//! Receive-only. Issues a `GET` with `Accept: text/event-stream` and turns
//! every dispatched event's `data` into a message. The last seen event id is
//! replayed as `Last-Event-ID` when the session reconnects.

use crate::decode::SseParser;
use crate::reader::ReaderTask;
use crate::request;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, COOKIE};
use reqwest::Url;
use std::sync::{Arc, Mutex, PoisonError};
use tenvis_stream_core::{
    AdapterSink, Capability, Payload, SessionConfig, SessionError, TransportAdapter,
    TransportError, TransportKind,
};
use tracing::{debug, trace, warn};

const LAST_EVENT_ID: &str = "last-event-id";

/// SSE transport.
pub struct SseAdapter {
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    last_event_id: Arc<Mutex<Option<String>>>,
    reader: ReaderTask,
}

impl SseAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-HTTP address or a
    /// header that cannot be sent.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let url = request::parse_url(&config.address)?;
        let mut headers = request::header_map(&config.sse.headers)?;
        if !config.sse.with_credentials {
            for name in [AUTHORIZATION, COOKIE] {
                if headers.remove(&name).is_some() {
                    debug!(header = %name, "Dropping credential header, with_credentials is off");
                }
            }
        }

        Ok(Self {
            url,
            headers,
            client: request::client()?,
            last_event_id: Arc::new(Mutex::new(None)),
            reader: ReaderTask::default(),
        })
    }

    /// Id of the last event received, if the server sent one.
    #[must_use]
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TransportAdapter for SseAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn capability(&self) -> Capability {
        Capability::ReceiveOnly
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        self.reader.stop().await;

        let mut builder = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = self.last_event_id() {
            if let Ok(value) = HeaderValue::from_str(&id) {
                debug!(last_event_id = %id, "Resuming event stream");
                builder = builder.header(LAST_EVENT_ID, value);
            }
        }

        let response = request::send(builder).await?;
        debug!(url = %self.url, status = %response.status(), "Event stream connected");
        sink.opened();

        let last_event_id = Arc::clone(&self.last_event_id);
        self.reader.spawn(async move {
            let mut body = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "Event stream read failed");
                        let reason = e.to_string();
                        sink.error(request::receive_error(e));
                        sink.closed(Some(reason));
                        return;
                    }
                };

                for event in parser.push(&chunk) {
                    if let Some(id) = event.id {
                        *last_event_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
                    }
                    if let Some(data) = event.data {
                        trace!(event = ?event.event, bytes = data.len(), "SSE event");
                        sink.message(Payload::from_text(data));
                    }
                }
            }

            debug!("Event stream ended");
            sink.closed(None);
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.stop().await;
        Ok(())
    }
}
