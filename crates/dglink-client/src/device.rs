use std::sync::{Arc, Mutex, PoisonError};

use dglink_protocol::{Channel, PulseFrame};

use crate::error::ClientError;

/// Hardware seam for the device side. Implementations talk to the physical
/// output over whatever local transport it uses; tests substitute
/// [`MockDevice`].
pub trait DeviceDriver: Send {
    /// Per-channel strength limits `(a, b)` reported by the hardware.
    fn limits(&self) -> (u32, u32);

    fn set_strength(&mut self, channel: Channel, value: u32) -> Result<(), ClientError>;

    /// Output one frame (100 ms) on a channel.
    fn play(&mut self, channel: Channel, frame: PulseFrame) -> Result<(), ClientError>;

    /// Stop output on a channel immediately.
    fn clear(&mut self, channel: Channel) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    SetStrength(Channel, u32),
    Play(Channel, PulseFrame),
    Clear(Channel),
}

/// In-memory device that records every call. Clones share one call log.
#[derive(Debug, Clone)]
pub struct MockDevice {
    limits: (u32, u32),
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl MockDevice {
    pub fn new(limit_a: u32, limit_b: u32) -> Self {
        Self {
            limits: (limit_a, limit_b),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frames played on one channel, in order.
    pub fn played(&self, channel: Channel) -> Vec<PulseFrame> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Play(ch, frame) if ch == channel => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DeviceCall) {
        tracing::debug!(?call, "mock device");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

impl DeviceDriver for MockDevice {
    fn limits(&self) -> (u32, u32) {
        self.limits
    }

    fn set_strength(&mut self, channel: Channel, value: u32) -> Result<(), ClientError> {
        self.record(DeviceCall::SetStrength(channel, value));
        Ok(())
    }

    fn play(&mut self, channel: Channel, frame: PulseFrame) -> Result<(), ClientError> {
        self.record(DeviceCall::Play(channel, frame));
        Ok(())
    }

    fn clear(&mut self, channel: Channel) -> Result<(), ClientError> {
        self.record(DeviceCall::Clear(channel));
        Ok(())
    }
}
