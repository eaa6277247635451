//! Long-polling adapter.
//!
//! Receive-only. Reports open immediately, then fetches the address in a
//! loop, emitting each non-empty line of every response as a message and
//! pausing `interval_ms` between polls. A failed poll is reported as an error
//! and retried by the loop after the same pause.

use crate::decode::non_empty_lines;
use crate::reader::ReaderTask;
use crate::request;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;
use std::time::Duration;
use tenvis_stream_core::{
    AdapterSink, Capability, Payload, SessionConfig, SessionError, TransportAdapter,
    TransportError, TransportKind,
};
use tracing::{debug, trace, warn};

/// Long-polling transport.
pub struct LongPollingAdapter {
    url: Url,
    interval: Duration,
    headers: HeaderMap,
    client: reqwest::Client,
    reader: ReaderTask,
}

impl LongPollingAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-HTTP address, an
    /// unsendable header, or a zero interval.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let options = &config.long_polling;
        if options.interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "long_polling.interval_ms must be greater than 0".into(),
            ));
        }

        Ok(Self {
            url: request::parse_url(&config.address)?,
            interval: Duration::from_millis(options.interval_ms),
            headers: request::header_map(&options.headers)?,
            client: request::client()?,
            reader: ReaderTask::default(),
        })
    }
}

async fn poll_once(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
) -> Result<String, TransportError> {
    let response = request::send(client.get(url.clone()).headers(headers.clone())).await?;
    response.text().await.map_err(request::receive_error)
}

#[async_trait]
impl TransportAdapter for LongPollingAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn capability(&self) -> Capability {
        Capability::ReceiveOnly
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        self.reader.stop().await;
        sink.opened();

        let client = self.client.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        let interval = self.interval;
        debug!(url = %url, interval_ms = interval.as_millis() as u64, "Starting poll loop");

        self.reader.spawn(async move {
            loop {
                match poll_once(&client, &url, &headers).await {
                    Ok(body) => {
                        let mut count = 0usize;
                        for line in non_empty_lines(&body) {
                            sink.message(Payload::from_text(line));
                            count += 1;
                        }
                        trace!(messages = count, "Poll complete");
                    }
                    Err(e) => {
                        warn!(error = %e, "Poll failed");
                        sink.error(e);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.reader.stop().await {
            debug!(url = %self.url, "Poll loop stopped");
        }
        Ok(())
    }
}
