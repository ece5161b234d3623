//! Frames and the wire envelope
//!
//! A [`Frame`] is the canonical message: `{kind, name, data, meta, time?, uuid?,
//! reply_to?}`. On the wire every message is an [`Envelope`] naming a channel
//! and carrying a JSON object. Clients publish on `event-<name>` and
//! `command-<name>`; the hub answers commands on `command`, routes events on
//! `event-<name>` and reports per-message failures on `error`.

pub mod settings;

use crate::error::ProtocolError;
use crate::types::{Data, FrameId, SpaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Channel on which the hub sends every command frame
pub const COMMAND_CHANNEL: &str = "command";

/// Channel on which the hub reports a failed inbound message
pub const ERROR_CHANNEL: &str = "error";

/// Built-in command names
pub const IDENTITY_COMMAND: &str = "identity";
pub const CONFIG_COMMAND: &str = "config";
pub const CONFIG_UPDATE_COMMAND: &str = "config-update";

/// Frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Broadcast to spaces
    Event,
    /// Control-plane request/response
    Command,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Event => "event",
            FrameKind::Command => "command",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical message envelope. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub name: String,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub meta: Data,
    /// Assigned by the hub on receipt; never trusted from a sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<FrameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<FrameId>,
}

impl Frame {
    pub fn new(kind: FrameKind, name: impl Into<String>, data: Data) -> Self {
        Self {
            kind,
            name: name.into(),
            data,
            meta: Data::new(),
            time: None,
            uuid: None,
            reply_to: None,
        }
    }

    pub fn event(name: impl Into<String>, data: Data) -> Self {
        Self::new(FrameKind::Event, name, data)
    }

    pub fn command(name: impl Into<String>, data: Data) -> Self {
        Self::new(FrameKind::Command, name, data)
    }

    /// Attach a fresh uuid so replies can be correlated
    pub fn with_uuid(mut self) -> Self {
        self.uuid = Some(uuid::Uuid::new_v4());
        self
    }

    pub fn replying_to(mut self, request: Option<FrameId>) -> Self {
        self.reply_to = request;
        self
    }

    /// Reject frames that cannot be routed
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.name.trim().is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        Ok(())
    }

    /// Outbound channel for this frame: `<kind>-<name>`
    pub fn channel(&self) -> String {
        format!("{}-{}", self.kind, self.name)
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_payload(channel: &str, payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload).map_err(|source| ProtocolError::Malformed {
            channel: channel.to_string(),
            source,
        })
    }
}

/// Event frame published by a client, with an optional target space list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRequest {
    #[serde(flatten)]
    pub frame: Frame,
    /// Space names; absent or empty means every space the sender joined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spaces: Option<Vec<String>>,
}

impl FrameRequest {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            spaces: None,
        }
    }

    pub fn to_spaces<I, S>(mut self, spaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spaces = Some(spaces.into_iter().map(Into::into).collect());
        self
    }

    /// Explicit target names, treating an empty list as absent
    pub fn target_names(&self) -> Option<&[String]> {
        match &self.spaces {
            Some(names) if !names.is_empty() => Some(names.as_slice()),
            _ => None,
        }
    }
}

/// Space summary carried in an `identity` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceRef {
    pub uuid: SpaceId,
    pub name: String,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub meta: Data,
}

/// Payload of the `identity` command: who the hub thinks the client is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub spaces: Vec<SpaceRef>,
}

impl Identity {
    pub fn to_frame(&self) -> Frame {
        let data = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Data::new(),
        };
        Frame::command(IDENTITY_COMMAND, data)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        serde_json::from_value(Value::Object(frame.data.clone())).map_err(|source| {
            ProtocolError::Malformed {
                channel: COMMAND_CHANNEL.to_string(),
                source,
            }
        })
    }

    pub fn space_names(&self) -> Vec<&str> {
        self.spaces.iter().map(|s| s.name.as_str()).collect()
    }
}

/// One wire message: a named channel carrying a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Client publication of an event
    pub fn publish(request: &FrameRequest) -> Self {
        let payload = serde_json::to_value(request).unwrap_or(Value::Null);
        Self::new(request.frame.channel(), payload)
    }

    /// Routed event or command request on `<kind>-<name>`
    pub fn for_frame(frame: &Frame) -> Self {
        Self::new(frame.channel(), frame.to_payload())
    }

    /// Hub-to-client command frame on the shared `command` channel
    pub fn command_reply(frame: &Frame) -> Self {
        Self::new(COMMAND_CHANNEL, frame.to_payload())
    }

    pub fn error(channel: &str, message: impl fmt::Display) -> Self {
        Self::new(
            ERROR_CHANNEL,
            serde_json::json!({ "error": message.to_string(), "channel": channel }),
        )
    }

    pub fn parse_channel(&self) -> Channel {
        Channel::parse(&self.channel)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|source| ProtocolError::Malformed {
            channel: String::new(),
            source,
        })
    }
}

/// Parsed channel name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// `event-<name>`
    Event(String),
    /// `command-<name>`
    Command(String),
    /// `command`
    CommandReply,
    /// `error`
    Error,
    Unknown(String),
}

impl Channel {
    pub fn parse(channel: &str) -> Self {
        if channel == COMMAND_CHANNEL {
            Channel::CommandReply
        } else if channel == ERROR_CHANNEL {
            Channel::Error
        } else if let Some(name) = channel.strip_prefix("event-") {
            Channel::Event(name.to_string())
        } else if let Some(name) = channel.strip_prefix("command-") {
            Channel::Command(name.to_string())
        } else {
            Channel::Unknown(channel.to_string())
        }
    }
}
