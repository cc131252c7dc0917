//! Waveform frames and batches.
//!
//! A frame is one 100 ms waveform step: four frequency bytes followed by four
//! intensity bytes. On the wire each frame travels as 16 hex characters.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::types::Channel;

/// Bytes per frame.
pub const FRAME_LEN: usize = 8;

/// Hex characters per frame on the wire.
pub const FRAME_HEX_LEN: usize = FRAME_LEN * 2;

/// Largest batch accepted in a single `pulse` message.
pub const MAX_PULSE_FRAMES: usize = 100;

/// Playback time of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(100);

/// Upper bound of a frame intensity byte.
pub const MAX_INTENSITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PulseFrame([u8; FRAME_LEN]);

impl PulseFrame {
    pub const fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// A frame whose four sub-steps share one frequency and intensity.
    /// Intensity is clamped to [`MAX_INTENSITY`].
    pub fn uniform(frequency: u8, intensity: u8) -> Self {
        let i = intensity.min(MAX_INTENSITY);
        Self([frequency, frequency, frequency, frequency, i, i, i, i])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn frequencies(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    pub fn intensities(&self) -> [u8; 4] {
        [self.0[4], self.0[5], self.0[6], self.0[7]]
    }

    /// Decode a 16-character hex string. Upper and lower case are accepted.
    pub fn from_hex(text: &str) -> Result<Self, ProtocolError> {
        if text.len() != FRAME_HEX_LEN {
            return Err(ProtocolError::InvalidFrameLength {
                expected: FRAME_HEX_LEN,
                actual: text.len(),
            });
        }
        let mut bytes = [0u8; FRAME_LEN];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| ProtocolError::InvalidFrameEncoding(format!("{text:?}: {e}")))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PulseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PulseFrame {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Ordered frames destined for one channel. Order is preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseBatch {
    pub channel: Channel,
    pub frames: Vec<PulseFrame>,
}

impl PulseBatch {
    pub fn new(channel: Channel, frames: Vec<PulseFrame>) -> Self {
        Self { channel, frames }
    }

    /// Decode every frame; the first bad frame fails the whole batch.
    pub fn from_hex<S: AsRef<str>>(channel: Channel, frames: &[S]) -> Result<Self, ProtocolError> {
        let frames = frames
            .iter()
            .map(|f| PulseFrame::from_hex(f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { channel, frames })
    }

    pub fn to_hex(&self) -> Vec<String> {
        self.frames.iter().map(PulseFrame::to_hex).collect()
    }

    /// Reject batches longer than `limit` frames.
    pub fn check_len(&self, limit: usize) -> Result<(), ProtocolError> {
        if self.frames.len() > limit {
            return Err(ProtocolError::MessageTooLong {
                len: self.frames.len(),
                limit,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total playback time.
    pub fn duration(&self) -> Duration {
        FRAME_DURATION * self.frames.len() as u32
    }
}
