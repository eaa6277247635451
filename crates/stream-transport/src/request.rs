//! reqwest plumbing shared by the HTTP-based adapters.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, Response, Url};
use std::collections::BTreeMap;
use tenvis_stream_core::{SessionError, TransportError};

/// Parse and check an `http(s)` address.
pub(crate) fn parse_url(address: &str) -> Result<Url, SessionError> {
    let url = Url::parse(address)
        .map_err(|e| SessionError::InvalidConfig(format!("invalid address {address:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SessionError::InvalidConfig(format!(
            "unsupported scheme {other:?} in {address:?}, expected http or https"
        ))),
    }
}

/// Convert configured headers, rejecting names or values HTTP cannot carry.
pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, SessionError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SessionError::InvalidConfig(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            SessionError::InvalidConfig(format!("invalid value for header {name}: {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn client() -> Result<reqwest::Client, SessionError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| SessionError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

/// Send a request; a non-2xx status is a failure.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, TransportError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::ConnectFailed(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Http {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

pub(crate) fn receive_error(e: reqwest::Error) -> TransportError {
    TransportError::ReceiveFailed(e.to_string())
}
