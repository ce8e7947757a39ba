//! Message Codec
//!
//! Text-frame encoding of [`ServerMessage`] and checked decoding of
//! [`ClientMessage`]. Decoding never panics; every failure is a
//! [`DecodeError`] with a reason a client can read.

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::network::protocol::{ClientMessage, ServerMessage};

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Binary frame that is not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Not parseable as JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Parsed, but not a JSON object.
    #[error("message must be a JSON object")]
    NotAnObject,

    /// Object without a string `type` field.
    #[error("message has no \"type\" field")]
    MissingType,

    /// `type` names no known message.
    #[error("unknown message type \"{0}\"")]
    UnknownType(String),

    /// Known type with missing or ill-typed fields.
    #[error("invalid \"{kind}\" message: {reason}")]
    InvalidPayload {
        /// Message type.
        kind: String,
        /// Field-level reason.
        reason: String,
    },
}

/// Decode a client frame.
pub fn decode(bytes: &[u8]) -> Result<ClientMessage, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    decode_value(parse(text)?)
}

/// Decode a client frame that has already been parsed as JSON.
pub fn decode_value(value: Value) -> Result<ClientMessage, DecodeError> {
    let Some(object) = value.as_object() else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(DecodeError::MissingType),
    };

    if !ClientMessage::TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Parse text as JSON without interpreting it.
pub fn parse(text: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))
}

/// Encode a server message as a text frame.
///
/// Server messages always serialize; should that ever fail, the peer gets
/// a generic error frame instead of nothing.
pub fn encode(message: &ServerMessage) -> String {
    match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {} message: {}", message.kind(), e);
            r#"{"type":"error","kind":"decode_error","message":"internal encoding failure","request":null}"#
                .to_string()
        }
    }
}
