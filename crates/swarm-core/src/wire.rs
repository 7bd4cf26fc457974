use crate::{Agent, LogPayload, Task};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;
pub const HUB_SENDER_ID: &str = "swarm-hub";

pub mod event {
    pub const JOIN_AGENT_ROOM: &str = "join_agent_room";
    pub const DASHBOARD_STREAM: &str = "dashboard_stream";
    pub const TOGGLE_AUTO_TRIGGER: &str = "toggle_auto_trigger";
    pub const AGENT_LOG: &str = "agent_log";
    pub const AGENT_UPDATED: &str = "agent_updated";
    pub const TASK_ADDED: &str = "task_added";
    pub const TASK_UPDATED: &str = "task_updated";
    pub const TASK_ASSIGNED: &str = "task_assigned";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr", into = "String")]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);

    pub fn is_supported(&self) -> bool {
        self.0 <= CURRENT_PROTOCOL_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Accepted spellings of the version field: `1`, `"1"` or `"v1"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<VersionRepr> for ProtocolVersion {
    type Error = String;

    fn try_from(repr: VersionRepr) -> Result<Self, Self::Error> {
        let version = match repr {
            VersionRepr::Number(value) => u16::try_from(value)
                .map_err(|_| format!("protocol version out of range: {value}"))?,
            VersionRepr::Text(text) => text
                .trim()
                .trim_start_matches('v')
                .parse::<u16>()
                .map_err(|err| format!("invalid protocol version '{text}': {err}"))?,
        };
        Ok(ProtocolVersion(version))
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.0.to_string()
    }
}

/// Typed envelope used when emitting. Serializes to the same shape as [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(flatten)]
    pub msg: WireMsg,
}

impl WireEnvelope {
    pub fn new(sender_id: Option<&str>, msg: WireMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            timestamp: Some(Utc::now().to_rfc3339()),
            sender_id: sender_id.map(str::to_string),
            msg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum WireMsg {
    JoinAgentRoom(JoinRoomPayload),
    /// Keep this socket on the unscoped stream even while it sits in a room.
    DashboardStream(TogglePayload),
    ToggleAutoTrigger(TogglePayload),
    AgentLog(LogPayload),
    AgentUpdated(Agent),
    TaskAdded(Task),
    TaskUpdated(Task),
    TaskAssigned(TaskAssignedPayload),
    Error(ErrorPayload),
}

impl WireMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            WireMsg::JoinAgentRoom(_) => event::JOIN_AGENT_ROOM,
            WireMsg::DashboardStream(_) => event::DASHBOARD_STREAM,
            WireMsg::ToggleAutoTrigger(_) => event::TOGGLE_AUTO_TRIGGER,
            WireMsg::AgentLog(_) => event::AGENT_LOG,
            WireMsg::AgentUpdated(_) => event::AGENT_UPDATED,
            WireMsg::TaskAdded(_) => event::TASK_ADDED,
            WireMsg::TaskUpdated(_) => event::TASK_UPDATED,
            WireMsg::TaskAssigned(_) => event::TASK_ASSIGNED,
            WireMsg::Error(_) => event::ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomPayload {
    pub agent_id: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TogglePayload {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAssignedPayload {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Envelope with the payload left as raw JSON. Routing and handler dispatch
/// only need the event name; payloads are decoded by whoever consumes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub event: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.event.trim().is_empty() {
            return Err(FrameError::Invalid("missing event name".to_string()));
        }
        if !self.version.is_supported() {
            return Err(FrameError::UnsupportedVersion(self.version.0));
        }
        if let Some(timestamp) = self.timestamp.as_deref() {
            if chrono::DateTime::parse_from_rfc3339(timestamp).is_err() {
                return Err(FrameError::Invalid(format!("invalid timestamp: {timestamp}")));
            }
        }
        Ok(())
    }

    pub fn decode_msg(&self) -> Result<WireMsg, FrameError> {
        let tagged = serde_json::json!({
            "event": self.event,
            "payload": self.payload,
        });
        serde_json::from_value(tagged).map_err(|err| FrameError::Decode(err.to_string()))
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|err| FrameError::Decode(format!("{}: {err}", self.event)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),
    #[error("invalid envelope: {0}")]
    Invalid(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn encode_msg(sender_id: Option<&str>, msg: WireMsg) -> Result<String, FrameError> {
    encode_frame(&WireEnvelope::new(sender_id, msg), DEFAULT_MAX_FRAME_BYTES)
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8], max_frame_bytes: usize) -> Result<T, FrameError> {
    if bytes.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(bytes).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Decode and validate one inbound frame into a raw [`Envelope`].
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, FrameError> {
    let envelope: Envelope = decode_frame(bytes, DEFAULT_MAX_FRAME_BYTES)?;
    envelope.validate()?;
    Ok(envelope)
}
