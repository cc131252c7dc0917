use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

// ─── Channel ──────────────────────────────────────────────────────

/// One of the two independent output lines of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            _ => Err(ProtocolError::MalformedMessage(format!(
                "unknown channel: {s}"
            ))),
        }
    }
}

// ─── Feedback buttons ────────────────────────────────────────────

/// One of the five feedback buttons per channel on the device-side app.
/// Pressed buttons are reported device→controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackButton {
    A0,
    A1,
    A2,
    A3,
    A4,
    B0,
    B1,
    B2,
    B3,
    B4,
}

impl FeedbackButton {
    pub const ALL: [Self; 10] = [
        Self::A0,
        Self::A1,
        Self::A2,
        Self::A3,
        Self::A4,
        Self::B0,
        Self::B1,
        Self::B2,
        Self::B3,
        Self::B4,
    ];

    /// Buttons are numbered 0..=9, channel A first.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn channel(self) -> Channel {
        if self.index() < 5 {
            Channel::A
        } else {
            Channel::B
        }
    }
}

impl fmt::Display for FeedbackButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.channel(), self.index() % 5)
    }
}

impl FromStr for FeedbackButton {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::MalformedMessage(format!("unknown feedback button: {s}")))
    }
}

// ─── Strength commands ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthOp {
    Increase,
    Decrease,
    #[serde(rename = "set")]
    SetTo,
}

impl StrengthOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::SetTo => "set",
        }
    }
}

impl fmt::Display for StrengthOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to change the strength of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrengthCommand {
    pub channel: Channel,
    pub op: StrengthOp,
    pub value: u32,
}

impl StrengthCommand {
    pub fn new(channel: Channel, op: StrengthOp, value: u32) -> Self {
        Self { channel, op, value }
    }

    pub fn increase(channel: Channel, value: u32) -> Self {
        Self::new(channel, StrengthOp::Increase, value)
    }

    pub fn decrease(channel: Channel, value: u32) -> Self {
        Self::new(channel, StrengthOp::Decrease, value)
    }

    pub fn set_to(channel: Channel, value: u32) -> Self {
        Self::new(channel, StrengthOp::SetTo, value)
    }
}

// ─── Strength state ──────────────────────────────────────────────

/// Current and maximum strength of a single channel.
///
/// `current <= maximum` always holds: every mutation clamps into
/// `[0, maximum]` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StrengthState {
    current: u32,
    maximum: u32,
}

impl StrengthState {
    pub fn new(current: u32, maximum: u32) -> Self {
        Self {
            current: current.min(maximum),
            maximum,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    /// Apply an operation and return the resulting current value.
    pub fn apply(&mut self, op: StrengthOp, value: u32) -> u32 {
        self.current = match op {
            StrengthOp::Increase => self.current.saturating_add(value).min(self.maximum),
            StrengthOp::Decrease => self.current.saturating_sub(value),
            StrengthOp::SetTo => value.min(self.maximum),
        };
        self.current
    }

    /// Lowering the maximum pulls `current` down with it.
    pub fn set_maximum(&mut self, maximum: u32) {
        self.maximum = maximum;
        self.current = self.current.min(maximum);
    }
}

/// Strength of both channels, as reported by the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceStrength {
    pub a: StrengthState,
    pub b: StrengthState,
}

impl DeviceStrength {
    /// Both channels at zero with the given limits.
    pub fn with_limits(limit_a: u32, limit_b: u32) -> Self {
        Self {
            a: StrengthState::new(0, limit_a),
            b: StrengthState::new(0, limit_b),
        }
    }

    /// Build from the four `strengthUpdate` fields.
    pub fn from_parts(a: u32, b: u32, a_limit: u32, b_limit: u32) -> Self {
        Self {
            a: StrengthState::new(a, a_limit),
            b: StrengthState::new(b, b_limit),
        }
    }

    pub fn channel(&self, channel: Channel) -> &StrengthState {
        match channel {
            Channel::A => &self.a,
            Channel::B => &self.b,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut StrengthState {
        match channel {
            Channel::A => &mut self.a,
            Channel::B => &mut self.b,
        }
    }

    /// Apply a command to its channel, returning the channel's new state.
    pub fn apply(&mut self, cmd: &StrengthCommand) -> StrengthState {
        let state = self.channel_mut(cmd.channel);
        state.apply(cmd.op, cmd.value);
        *state
    }
}
