use std::collections::HashMap;

use base64::prelude::*;
use serde::Deserialize;
use thiserror::Error;

/// One delivered event. Only the payload is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundEvent {
    /// Base64 text, as published.
    #[serde(rename = "data", default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Supplied by the trigger runtime; used for logging only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub event_id: String,
    pub timestamp: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl InboundEvent {
    pub fn new(payload: impl Into<String>) -> Self {
        InboundEvent {
            payload: Some(payload.into()),
            attributes: HashMap::new(),
        }
    }

    /// Decodes the payload into the message body.
    ///
    /// An absent payload is an empty body. Line breaks and other ASCII
    /// whitespace inside the base64 text are ignored.
    pub fn decode_payload(&self) -> Result<String, DecodeError> {
        let Some(payload) = &self.payload else {
            return Ok(String::new());
        };

        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let bytes = BASE64_STANDARD.decode(compact)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl InvocationContext {
    pub fn new(event_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        InvocationContext {
            event_id: event_id.into(),
            timestamp: timestamp.into(),
        }
    }
}
