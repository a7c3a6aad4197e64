//! Codec for encoding and decoding control messages.
//!
//! Decoding is defensive: every malformed, oversized or unknown payload
//! yields a [`CodecError`], never a panic. Callers log and drop those.

use crate::message::{ControlMessage, MessageKind, MAX_CHAT_CHARS};
use bytes::Bytes;

/// Largest payload accepted from the data channel.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Payload exceeds [`MAX_PAYLOAD_BYTES`]
    #[error("Payload too large: {0} bytes")]
    Oversized(usize),

    /// Payload is not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    /// Payload is not a JSON object with a string `type`
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// `type` names a message this build does not know
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known type with missing or mistyped fields
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    /// Serialization of an outbound message failed
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl CodecError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            CodecError::Oversized(_) => "oversized",
            CodecError::InvalidUtf8 => "invalid_utf8",
            CodecError::InvalidFormat(_) => "invalid_format",
            CodecError::UnknownType(_) => "unknown_type",
            CodecError::InvalidPayload { .. } => "invalid_payload",
            CodecError::Encode(_) => "encode",
        }
    }
}

/// Encode a control message to bytes
///
/// # Errors
///
/// Returns an error if the message cannot be serialized or is too large
pub fn encode_message(message: &ControlMessage) -> Result<Bytes, CodecError> {
    let encoded = serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))?;
    if encoded.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::Oversized(encoded.len()));
    }
    Ok(Bytes::from(encoded))
}

/// Decode a control message from bytes
///
/// # Errors
///
/// Returns an error for any payload that is not a well-formed, known message
pub fn decode_message(data: &[u8]) -> Result<ControlMessage, CodecError> {
    if data.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::Oversized(data.len()));
    }

    let text = std::str::from_utf8(data).map_err(|_| CodecError::InvalidUtf8)?;

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

    let wire_type = value
        .as_object()
        .ok_or_else(|| CodecError::InvalidFormat("expected a JSON object".to_string()))?
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CodecError::InvalidFormat("missing string field `type`".to_string()))?;

    let kind = MessageKind::from_wire(wire_type)
        .ok_or_else(|| CodecError::UnknownType(wire_type.chars().take(64).collect()))?;

    let message: ControlMessage =
        serde_json::from_value(value).map_err(|e| CodecError::InvalidPayload {
            kind: kind.as_str(),
            reason: e.to_string(),
        })?;

    validate(&message)?;
    Ok(message)
}

/// Semantic checks serde cannot express.
fn validate(message: &ControlMessage) -> Result<(), CodecError> {
    match message {
        ControlMessage::ChatMessage { text, .. } => {
            if text.trim().is_empty() {
                return Err(CodecError::InvalidPayload {
                    kind: MessageKind::ChatMessage.as_str(),
                    reason: "empty text".to_string(),
                });
            }
            if text.chars().count() > MAX_CHAT_CHARS {
                return Err(CodecError::InvalidPayload {
                    kind: MessageKind::ChatMessage.as_str(),
                    reason: "text too long".to_string(),
                });
            }
            Ok(())
        }
        ControlMessage::ScreenShare {
            sharer_identity, ..
        } if sharer_identity.as_str().is_empty() => Err(CodecError::InvalidPayload {
            kind: MessageKind::ScreenShare.as_str(),
            reason: "empty sharerIdentity".to_string(),
        }),
        ControlMessage::MuteParticipant { target_identity }
        | ControlMessage::UnmuteParticipant { target_identity }
        | ControlMessage::KickParticipant { target_identity }
            if target_identity.as_str().is_empty() =>
        {
            Err(CodecError::InvalidPayload {
                kind: message.kind().as_str(),
                reason: "empty targetIdentity".to_string(),
            })
        }
        _ => Ok(()),
    }
}
