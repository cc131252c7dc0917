//! Wire messages and the JSON codec.
//!
//! One JSON object per message; `type` selects the variant and field names are
//! camelCase. The codec only checks shape (required fields and JSON types).
//! Semantic checks such as frame width belong to [`Command::from_message`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::pulse::PulseBatch;
use crate::types::{Channel, DeviceStrength, FeedbackButton, StrengthCommand, StrengthOp};

/// `bind.message` value for an established binding.
pub const BIND_BOUND: &str = "bound";

/// `bind.message` value for an identity-only bind (no `targetId`).
pub const BIND_REGISTERED: &str = "registered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Identifier issued on connect.
    ClientId {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Bind request (client→server) or bind result (server→client).
    Bind {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Unbind {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Strength {
        channel: Channel,
        op: StrengthOp,
        value: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    /// Authoritative device state, device→controller.
    StrengthUpdate {
        a: u32,
        b: u32,
        #[serde(rename = "aLimit")]
        a_limit: u32,
        #[serde(rename = "bLimit")]
        b_limit: u32,
    },
    Pulse {
        channel: Channel,
        frames: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Clear {
        channel: Channel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    /// A feedback button pressed on the device side, device→controller.
    Feedback {
        button: FeedbackButton,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    /// A relayed command was accepted by the peer's queue.
    Ack {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    /// The bound peer went away.
    Disconnected,
}

impl WireMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientId { .. } => "clientId",
            Self::Bind { .. } => "bind",
            Self::Unbind { .. } => "unbind",
            Self::Strength { .. } => "strength",
            Self::StrengthUpdate { .. } => "strengthUpdate",
            Self::Pulse { .. } => "pulse",
            Self::Clear { .. } => "clear",
            Self::Feedback { .. } => "feedback",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Ack { .. } => "ack",
            Self::Error { .. } => "error",
            Self::Disconnected => "disconnected",
        }
    }

    /// Client-chosen correlation id, if the message carries one.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Self::Bind { id, .. }
            | Self::Unbind { id }
            | Self::Strength { id, .. }
            | Self::Pulse { id, .. }
            | Self::Clear { id, .. }
            | Self::Ack { id, .. }
            | Self::Error { id, .. } => *id,
            _ => None,
        }
    }

    /// Whether a client may send this message. `clientId`, `ack`, `error`
    /// and `disconnected` only ever come from the relay.
    pub fn is_client_message(&self) -> bool {
        !matches!(
            self,
            Self::ClientId { .. } | Self::Ack { .. } | Self::Error { .. } | Self::Disconnected
        )
    }

    pub fn error(err: &ProtocolError, id: Option<u64>) -> Self {
        Self::Error {
            message: err.to_string(),
            code: Some(err.code().as_u16()),
            id,
        }
    }

    pub fn ack(command: &str, id: Option<u64>) -> Self {
        Self::Ack {
            command: command.to_string(),
            id,
        }
    }

    pub fn heartbeat_now() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn strength_update(state: &DeviceStrength) -> Self {
        Self::StrengthUpdate {
            a: state.a.current(),
            b: state.b.current(),
            a_limit: state.a.maximum(),
            b_limit: state.b.maximum(),
        }
    }
}

// ─── Commands ─────────────────────────────────────────────────────

/// A validated command that changes device-observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Strength(StrengthCommand),
    Pulse(PulseBatch),
    Clear(Channel),
}

impl Command {
    /// Validate a wire message as a command.
    ///
    /// Returns `Ok(None)` for messages that are not commands. Pulse frames are
    /// decoded here and the batch length is checked against `max_frames`.
    pub fn from_message(msg: &WireMessage, max_frames: usize) -> Result<Option<Self>, ProtocolError> {
        match msg {
            WireMessage::Strength {
                channel, op, value, ..
            } => Ok(Some(Self::Strength(StrengthCommand::new(*channel, *op, *value)))),
            WireMessage::Pulse {
                channel, frames, ..
            } => {
                let batch = PulseBatch::from_hex(*channel, frames)?;
                batch.check_len(max_frames)?;
                Ok(Some(Self::Pulse(batch)))
            }
            WireMessage::Clear { channel, .. } => Ok(Some(Self::Clear(*channel))),
            _ => Ok(None),
        }
    }

    pub fn to_message(&self, id: Option<u64>) -> WireMessage {
        match self {
            Self::Strength(cmd) => WireMessage::Strength {
                channel: cmd.channel,
                op: cmd.op,
                value: cmd.value,
                id,
            },
            Self::Pulse(batch) => WireMessage::Pulse {
                channel: batch.channel,
                frames: batch.to_hex(),
                id,
            },
            Self::Clear(channel) => WireMessage::Clear {
                channel: *channel,
                id,
            },
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Strength(cmd) => cmd.channel,
            Self::Pulse(batch) => batch.channel,
            Self::Clear(channel) => *channel,
        }
    }
}
