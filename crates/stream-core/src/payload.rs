//! Message payloads.
//!
//! Adapters decide how bytes on the wire become a [`Payload`]; text transports
//! use [`Payload::from_text`], which keeps valid JSON structured and falls back
//! to the raw string otherwise.

use bytes::Bytes;
use serde::Serialize;
use std::borrow::Cow;

/// An arbitrary message value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Plain text that was not valid JSON.
    Text(String),
    /// Structured JSON.
    Json(serde_json::Value),
    /// Raw bytes.
    Binary(#[serde(serialize_with = "serialize_bytes")] Bytes),
}

fn serialize_bytes<S: serde::Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(bytes)
}

impl Payload {
    /// Decode a text frame: JSON when it parses, the raw string otherwise.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match serde_json::from_str(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(text),
        }
    }

    /// Borrow the payload as text, serializing JSON.
    ///
    /// Returns `None` for binary payloads.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Payload::Text(text) => Some(Cow::Borrowed(text)),
            Payload::Json(value) => Some(Cow::Owned(value.to_string())),
            Payload::Binary(_) => None,
        }
    }

    /// The JSON value, if this payload is structured.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Json(value) => value.to_string().len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the encoded payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes to put on the wire.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::from(text),
            Payload::Json(value) => Bytes::from(value.to_string()),
            Payload::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}
