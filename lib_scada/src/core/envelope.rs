//! Wire envelopes of the event stream.
//!
//! Inbound frames are JSON objects discriminated by `type`. The entity payload
//! is either nested under `data` or merged into the top level next to `type`;
//! both shapes are accepted. Outbound frames are the two subscribe intents.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{MirrorError, Result};
use crate::models::{Alarm, Tag};

/// Entity kinds the stream can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Tags,
    Alarms,
}

impl Topic {
    /// Every topic, in the order the intents are sent.
    pub const ALL: [Topic; 2] = [Topic::Tags, Topic::Alarms];

    pub fn subscribe_action(self) -> &'static str {
        match self {
            Topic::Tags => "subscribe_tags",
            Topic::Alarms => "subscribe_alarms",
        }
    }
}

/// A frame sent to the server. `type` and `action` carry the same string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
}

impl OutboundEnvelope {
    pub fn subscribe(topic: Topic) -> Self {
        let action = topic.subscribe_action().to_string();
        Self {
            kind: action.clone(),
            action,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    TagUpdate(Tag),
    AlarmUpdate(Alarm),
    /// `connection_established`, `subscription_confirmed`: informational only.
    Notice { kind: String, message: Option<String> },
    /// Any other `type`. Tolerated and ignored.
    Unrecognized { kind: String },
}

const NOTICE_KINDS: [&str; 2] = ["connection_established", "subscription_confirmed"];

impl InboundEnvelope {
    /// Parses one text frame.
    ///
    /// Fails with [`MirrorError::Parse`] for non-JSON input, non-object frames,
    /// a missing or non-string `type`, or a payload that does not match the
    /// entity schema of a recognized kind.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut frame) = value else {
            return Err(MirrorError::Parse("frame is not a JSON object".into()));
        };
        let kind = match frame.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(MirrorError::Parse("`type` is not a string".into())),
            None => return Err(MirrorError::Parse("frame has no `type`".into())),
        };

        if kind == "tag_update" {
            return Ok(InboundEnvelope::TagUpdate(serde_json::from_value(payload(&mut frame))?));
        }
        if kind == "alarm_update" {
            return Ok(InboundEnvelope::AlarmUpdate(serde_json::from_value(payload(&mut frame))?));
        }
        if NOTICE_KINDS.contains(&kind.as_str()) {
            let message = frame.get("message").and_then(Value::as_str).map(str::to_owned);
            return Ok(InboundEnvelope::Notice { kind, message });
        }
        Ok(InboundEnvelope::Unrecognized { kind })
    }
}

/// The entity payload: the `data` object when present, else the frame itself.
fn payload(frame: &mut Map<String, Value>) -> Value {
    match frame.remove("data") {
        Some(data @ Value::Object(_)) => data,
        Some(other) => {
            frame.insert("data".into(), other);
            Value::Object(std::mem::take(frame))
        }
        None => Value::Object(std::mem::take(frame)),
    }
}
