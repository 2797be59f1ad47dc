//! Frame Codec and Classifier
//!
//! Decodes WebSocket text into a `Frame` and classifies each frame as a
//! subscription acknowledgement, a control event, a heartbeat, or a data
//! payload for a bound channel.
//!
//! # Classification
//!
//! 1. A JSON object whose `event` is `subscribed` is an `Ack`.
//! 2. Other known control events (`info`, `error`, ...) are `Control`.
//! 3. A JSON array is `[chanId, ...]`; the channel id is resolved through
//!    the registry first, so a stale registry surfaces as `UnknownChannel`.
//! 4. `[chanId, "hb"]` is a `Heartbeat`.
//! 5. `[chanId, [ ... ]]` is a snapshot, anything longer is a delta.
//!
//! Anything else is a `MalformedFrame`.

use serde_json::{Map, Value};

use super::messages::{EVENT_SUBSCRIBED, HEARTBEAT_MARKER, SubscribedEvent};
use crate::domain::channel::{ChannelBinding, ChannelId, ChannelKind, ChannelRegistry, RegistryError};
use crate::domain::translate::Payload;

/// Control events that carry no channel data.
const CONTROL_EVENTS: [&str; 5] = ["info", "error", "pong", "unsubscribed", "conf"];

/// Longest raw excerpt kept in error messages.
const EXCERPT_LEN: usize = 200;

// =============================================================================
// Errors
// =============================================================================

/// Frame decoding and classification errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    /// The frame matches none of the known shapes.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong.
        reason: String,
    },

    /// The frame names a channel id the registry does not know.
    #[error("unknown channel id {0}")]
    UnknownChannel(ChannelId),
}

impl ClassifyError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}

impl From<RegistryError> for ClassifyError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownChannel(id) => Self::UnknownChannel(id),
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A decoded message. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Control object (`{"event": ...}`).
    Event(Map<String, Value>),
    /// Positional channel message (`[chanId, ...]`).
    Array(Vec<Value>),
}

impl Frame {
    /// Re-encode for diagnostics.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Event(map) => Value::Object(map.clone()),
            Self::Array(items) => Value::Array(items.clone()),
        }
    }
}

/// JSON codec for the exchange stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text message into a frame.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::MalformedFrame` if the text is not JSON or is
    /// neither an object nor an array.
    pub fn decode(&self, text: &str) -> Result<Frame, ClassifyError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| ClassifyError::malformed(format!("invalid JSON ({e}): {}", excerpt(text))))?;

        match value {
            Value::Object(map) => Ok(Frame::Event(map)),
            Value::Array(items) => Ok(Frame::Array(items)),
            other => Err(ClassifyError::malformed(format!(
                "expected JSON array or object, got: {}",
                excerpt(&other.to_string())
            ))),
        }
    }

    /// Encode a value to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, serde_json::Error> {
        serde_json::to_string(value)
    }
}

fn excerpt(text: &str) -> &str {
    let mut end = text.len().min(EXCERPT_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// =============================================================================
// Classification
// =============================================================================

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Subscription acknowledgement to feed into the registry.
    Ack(ChannelBinding),
    /// Control event with no channel data.
    Control {
        /// Event name.
        event: String,
        /// The whole event object.
        raw: Value,
    },
    /// Keep-alive on a bound channel.
    Heartbeat(ChannelBinding),
    /// Data payload on a bound channel.
    Data {
        /// Channel the payload belongs to.
        binding: ChannelBinding,
        /// Snapshot or delta content.
        payload: Payload,
    },
}

/// Classify a decoded frame against the current registry.
///
/// The registry is only read; acks are returned for the caller to record.
///
/// # Errors
///
/// Returns `ClassifyError::UnknownChannel` for an unbound channel id and
/// `ClassifyError::MalformedFrame` for unrecognized shapes.
pub fn classify(frame: Frame, registry: &ChannelRegistry) -> Result<Classified, ClassifyError> {
    match frame {
        Frame::Event(map) => classify_event(map),
        Frame::Array(items) => classify_array(items, registry),
    }
}

fn classify_event(map: Map<String, Value>) -> Result<Classified, ClassifyError> {
    let event = map.get("event").and_then(Value::as_str).map(str::to_string);

    match event.as_deref() {
        Some(EVENT_SUBSCRIBED) => classify_ack(map),
        // Some feeds omit the event name on acks.
        None if map.contains_key("chanId") && map.contains_key("channel") => classify_ack(map),
        Some(name) if CONTROL_EVENTS.contains(&name) => Ok(Classified::Control {
            event: name.to_string(),
            raw: Value::Object(map),
        }),
        Some(name) => Err(ClassifyError::malformed(format!("unknown event '{name}'"))),
        None => Err(ClassifyError::malformed(format!(
            "object without event: {}",
            excerpt(&Value::Object(map).to_string())
        ))),
    }
}

fn classify_ack(mut map: Map<String, Value>) -> Result<Classified, ClassifyError> {
    map.entry("event")
        .or_insert_with(|| Value::String(EVENT_SUBSCRIBED.to_string()));
    let raw = Value::Object(map);
    let ack: SubscribedEvent = serde_json::from_value(raw.clone())
        .map_err(|e| ClassifyError::malformed(format!("invalid subscription ack ({e}): {raw}")))?;

    let kind = ChannelKind::from_wire(&ack.channel)
        .ok_or_else(|| ClassifyError::malformed(format!("ack for unknown channel '{}'", ack.channel)))?;

    Ok(Classified::Ack(ChannelBinding::new(ack.chan_id, ack.pair, kind)))
}

fn classify_array(items: Vec<Value>, registry: &ChannelRegistry) -> Result<Classified, ClassifyError> {
    let Some((head, rest)) = items.split_first() else {
        return Err(ClassifyError::malformed("empty array"));
    };

    let chan_id = head
        .as_u64()
        .ok_or_else(|| ClassifyError::malformed(format!("channel id is not an integer: {head}")))?;

    let binding = registry.resolve(chan_id)?.clone();

    match rest {
        [] => Err(ClassifyError::malformed(format!("channel {chan_id} frame has no content"))),
        [Value::String(marker)] if marker == HEARTBEAT_MARKER => Ok(Classified::Heartbeat(binding)),
        [Value::Array(inner)] => Ok(Classified::Data {
            binding,
            payload: Payload::Snapshot(inner.clone()),
        }),
        fields => Ok(Classified::Data {
            binding,
            payload: Payload::Delta(fields.to_vec()),
        }),
    }
}
