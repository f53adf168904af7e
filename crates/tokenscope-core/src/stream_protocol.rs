use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const HEARTBEAT_LITERAL: &str = "heartbeat";
pub const PONG_LITERAL: &str = "pong";
pub const PING_LITERAL: &str = "ping";

pub const KIND_HEARTBEAT: &str = "heartbeat";
pub const KIND_HEARTBEAT_RESPONSE: &str = "heartbeat_response";
pub const KIND_CONNECTION_STATUS: &str = "connection_status";

/// JSON frame shape used by both peers: `{"type", "data", "timestamp"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl StreamEnvelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn encode(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|err| DecodeError::Encode(err.to_string()))
    }
}

/// An application event, forwarded verbatim to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub kind: String,
    pub data: Value,
    pub timestamp: Option<String>,
}

/// Protocol-level frames answered by the connection layer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// `literal` is true for the bare `heartbeat` token, false for the JSON form.
    LivenessProbe { literal: bool },
    LivenessResponse,
    Pong,
    ConnectionAck { status: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Control(ControlFrame),
    Event(RawEvent),
    /// Text that is not JSON. Not an error: some peers send bare tokens.
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(String),
    #[error("frame has no string \"type\" field")]
    MissingKind,
    #[error("frame encode failed: {0}")]
    Encode(String),
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<DecodedFrame, DecodeError> {
    if text.len() > max_frame_bytes {
        return Err(DecodeError::Oversized {
            size: text.len(),
            max: max_frame_bytes,
        });
    }
    let trimmed = text.trim();
    if trimmed == HEARTBEAT_LITERAL {
        return Ok(DecodedFrame::Control(ControlFrame::LivenessProbe { literal: true }));
    }
    if trimmed == PONG_LITERAL {
        return Ok(DecodedFrame::Control(ControlFrame::Pong));
    }

    let parsed: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Ok(DecodedFrame::Opaque(text.to_string())),
    };
    let Value::Object(mut map) = parsed else {
        return Err(DecodeError::MissingKind);
    };
    let kind = match map.remove("type") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
        _ => return Err(DecodeError::MissingKind),
    };
    let data = map.remove("data").unwrap_or_else(empty_object);
    let timestamp = map
        .remove("timestamp")
        .and_then(|value| value.as_str().map(str::to_string));

    let frame = match kind.as_str() {
        KIND_HEARTBEAT => DecodedFrame::Control(ControlFrame::LivenessProbe { literal: false }),
        KIND_HEARTBEAT_RESPONSE => DecodedFrame::Control(ControlFrame::LivenessResponse),
        KIND_CONNECTION_STATUS => DecodedFrame::Control(ControlFrame::ConnectionAck {
            status: data
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => DecodedFrame::Event(RawEvent {
            kind,
            data,
            timestamp,
        }),
    };
    Ok(frame)
}

pub fn decode_binary_frame(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<DecodedFrame, DecodeError> {
    if bytes.len() > max_frame_bytes {
        return Err(DecodeError::Oversized {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }
    let text =
        std::str::from_utf8(bytes).map_err(|err| DecodeError::InvalidUtf8(err.to_string()))?;
    decode_frame(text, max_frame_bytes)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
