//! Stream Codec Module
//!
//! JSON encoding and decoding for the Bybit public stream.
//!
//! Inbound frames are classified by their discriminator:
//! - `op` present: control frame (`ping`, `pong`, `subscribe` ack)
//! - `topic` present: data frame
//!
//! Anything else is a decode error; callers log and drop it.

use super::messages::{ControlEnvelope, ControlFrame, DataFrame, InboundFrame, OutboundFrame};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,

    /// Control frame with an operation this client does not handle.
    #[error("unknown operation: {0}")]
    UnknownOp(String),

    /// Frame with neither `op` nor `topic`.
    #[error("frame has neither 'op' nor 'topic'")]
    Unclassified,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl CodecError {
    /// Label for the decode error counter.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::NotUtf8 => "not_utf8",
            Self::UnknownOp(_) => "unknown_op",
            Self::Unclassified => "unclassified",
            Self::InvalidFormat(_) => "invalid_format",
        }
    }
}

/// JSON codec for the public stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object or cannot be
    /// classified as a control or data frame.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        if object.contains_key("op") {
            return self.decode_control(value).map(InboundFrame::Control);
        }

        if object.get("topic").is_some_and(serde_json::Value::is_string) {
            let frame: DataFrame = serde_json::from_value(value)?;
            return Ok(InboundFrame::Data(frame));
        }

        Err(CodecError::Unclassified)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotUtf8`] for non-text payloads, otherwise the
    /// same errors as [`JsonCodec::decode`].
    pub fn decode_binary(&self, bytes: &[u8]) -> Result<InboundFrame, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
        self.decode(text)
    }

    fn decode_control(&self, value: serde_json::Value) -> Result<ControlFrame, CodecError> {
        let envelope: ControlEnvelope = serde_json::from_value(value.clone())?;

        match envelope.op.as_str() {
            // Spot echoes our ping back as op=ping with ret_msg=pong.
            "ping" if envelope.ret_msg.as_deref() == Some("pong") => Ok(ControlFrame::Pong),
            "ping" => Ok(ControlFrame::Ping),
            "pong" => Ok(ControlFrame::Pong),
            "subscribe" => Ok(ControlFrame::SubscribeAck(serde_json::from_value(value)?)),
            other => Err(CodecError::UnknownOp(other.to_string())),
        }
    }

    /// Encode an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &OutboundFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

/// First characters of a frame for error messages.
pub(crate) fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
