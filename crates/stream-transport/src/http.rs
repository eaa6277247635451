//! Newline-delimited HTTP stream adapter.
//!
//! Receive-only. Each non-empty line of a streaming response body (JSON Lines
//! or plain text) becomes one message.

use crate::decode::LineSplitter;
use crate::reader::ReaderTask;
use crate::request;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Url;
use tenvis_stream_core::{
    AdapterSink, Capability, HttpMethod, Payload, SessionConfig, SessionError, TransportAdapter,
    TransportError, TransportKind,
};
use tracing::{debug, warn};

/// HTTP streaming transport.
pub struct HttpStreamAdapter {
    url: Url,
    method: HttpMethod,
    headers: HeaderMap,
    body: Option<String>,
    client: reqwest::Client,
    reader: ReaderTask,
}

impl HttpStreamAdapter {
    /// Create an adapter from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-HTTP address, an
    /// unsendable header, or a body on a `GET` request.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let options = &config.http;
        if options.method == HttpMethod::Get && options.body.is_some() {
            return Err(SessionError::InvalidConfig(
                "http.body requires method = \"POST\"".into(),
            ));
        }

        Ok(Self {
            url: request::parse_url(&config.address)?,
            method: options.method,
            headers: request::header_map(&options.headers)?,
            body: options.body.clone(),
            client: request::client()?,
            reader: ReaderTask::default(),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let builder = match self.method {
            HttpMethod::Get => self.client.get(self.url.clone()),
            HttpMethod::Post => self.client.post(self.url.clone()),
        };
        let builder = builder.headers(self.headers.clone());
        match &self.body {
            Some(body) => builder.body(body.clone()),
            None => builder,
        }
    }
}

#[async_trait]
impl TransportAdapter for HttpStreamAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn capability(&self) -> Capability {
        Capability::ReceiveOnly
    }

    async fn open(&mut self, sink: AdapterSink) -> Result<(), TransportError> {
        self.reader.stop().await;

        let response = request::send(self.request()).await?;
        debug!(url = %self.url, method = ?self.method, "HTTP stream connected");
        sink.opened();

        self.reader.spawn(async move {
            let mut body = response.bytes_stream();
            let mut lines = LineSplitter::default();

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        for line in lines.push(&chunk) {
                            if !line.is_empty() {
                                sink.message(Payload::from_text(line));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "HTTP stream read failed");
                        sink.error(request::receive_error(e));
                        return;
                    }
                }
            }

            if let Some(rest) = lines.finish() {
                sink.message(Payload::from_text(rest));
            }
            debug!("HTTP stream ended");
            sink.closed(None);
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.stop().await;
        Ok(())
    }
}
