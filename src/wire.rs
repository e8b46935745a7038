//! Wire protocol for the client-facing event stream.
//!
//! Each orchestrator event maps to exactly one frame. Over SSE a frame is
//! an `event:` line naming the type, a `data:` line carrying the JSON
//! payload, and a blank line. Over WebSocket the same payload travels as a
//! whole text message with a `type` tag. Encoding is stateless per event;
//! decoding buffers partial frames and treats unparseable payloads as soft
//! errors the caller can log and skip.

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::CostMetrics;
use crate::sse_parser::{SseFrame, SseFrameStream};

/// A typed event on the client-facing stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// The turn has started.
    MessageStart { session_id: String },
    /// One chunk of assistant text, in order.
    Content { text: String },
    /// The model requested a tool invocation.
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    /// A tool finished, with either output or an error.
    ToolResult {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Terminal success: the turn's usage summary.
    MessageEnd { usage: CostMetrics },
    /// Terminal failure: no further events follow for this turn.
    Error { kind: String, message: String },
}

/// Errors from decoding a single frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame arrived without an `event:` line.
    #[error("frame is missing an event type")]
    MissingType,
    /// Payload was not valid JSON for the named event.
    #[error("invalid payload for event '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WireEvent {
    /// The literal event tag used on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            WireEvent::MessageStart { .. } => "message_start",
            WireEvent::Content { .. } => "content",
            WireEvent::ToolCall { .. } => "tool_call",
            WireEvent::ToolResult { .. } => "tool_result",
            WireEvent::MessageEnd { .. } => "message_end",
            WireEvent::Error { .. } => "error",
        }
    }

    /// Whether this event terminates the turn's stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WireEvent::MessageEnd { .. } | WireEvent::Error { .. }
        )
    }

    /// JSON payload without the type tag (the SSE `data:` body).
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        value
    }

    /// Encode as one SSE frame.
    #[must_use]
    pub fn encode_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.tag(), self.payload())
    }

    /// Decode from an assembled SSE frame.
    pub fn decode(frame: &SseFrame) -> Result<Self, DecodeError> {
        let event = frame.event.as_deref().ok_or(DecodeError::MissingType)?;

        let mut value: serde_json::Value = if frame.data.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&frame.data).map_err(|source| DecodeError::InvalidPayload {
                event: event.to_string(),
                source,
            })?
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), serde_json::Value::String(event.into()));
        }

        serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload {
            event: event.to_string(),
            source,
        })
    }
}

/// Decode a byte stream into wire events, one per frame.
///
/// Frames that fail to parse are logged and skipped (soft error) rather
/// than aborting the stream; transport errors from the underlying stream
/// terminate it.
pub fn decode_stream<S, E>(bytes: S) -> impl Stream<Item = Result<WireEvent, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    use futures::StreamExt;

    SseFrameStream::new(bytes).filter_map(|item| async move {
        match item {
            Ok(frame) => match WireEvent::decode(&frame) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable frame");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        }
    })
}
