//! Protocol definitions for the push channel
//!
//! Frames are JSON text objects tagged by a `type` field. Decoding is
//! absent-tolerant: unknown types map to [`InboundMessage::Unknown`] and
//! missing payload fields take their defaults.

mod message;

pub use message::{
    ChatPayload, ErrorPayload, GroupInfoPayload, GroupRefPayload, GroupSummaryPayload,
    InboundMessage, InputKind, NavigationPayload, OutboundMessage, ParticipantPayload,
    PromptPayload, QuizPayload, QuizResultPayload, ReadyCheckPayload, RoomcastGroupsPayload,
    RoomcastRegisteredPayload, RoomcastRejectedPayload, StudentResponsePayload,
    SubmissionPayload, TimerPayload,
};

use serde_json::Value;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message has no `type` field")]
    MissingType,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Maximum inbound frame size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Serialize an outbound message to a JSON text frame
pub fn encode(msg: &OutboundMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|source| ProtocolError::Encode {
        kind: msg.kind(),
        source,
    })
}

/// Decode an inbound JSON text frame
///
/// Unknown `type` values decode successfully as [`InboundMessage::Unknown`];
/// only frames that are not JSON objects with a string `type` are errors.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::MalformedMessage(format!("Invalid JSON: {}", e)))?;

    let kind = message_type(&value)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    let message: InboundMessage = serde_json::from_value(value).map_err(|e| {
        ProtocolError::MalformedMessage(format!("Bad `{}` payload: {}", kind, e))
    })?;

    if message == InboundMessage::Unknown {
        tracing::debug!("Ignoring unknown message type: {}", kind);
    }

    Ok(message)
}

/// Read the `type` tag of a decoded frame
pub fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}
