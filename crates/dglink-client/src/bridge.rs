//! Device side of a binding: applies relayed commands to a [`DeviceDriver`]
//! and reports the resulting state back to the controller.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use dglink_protocol::{
    Channel, DeviceStrength, FRAME_DURATION, PulseBatch, PulseFrame, StrengthCommand,
    StrengthState,
};

use crate::client::{ClientEvent, RelayClient};
use crate::device::DeviceDriver;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub limit_a: u32,
    pub limit_b: u32,
    /// Playback tick; one frame per channel is played each tick.
    pub tick_ms: u64,
}

impl BridgeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            limit_a: 100,
            limit_b: 100,
            tick_ms: FRAME_DURATION.as_millis() as u64,
        }
    }
}

pub struct DeviceBridge<D> {
    device: D,
    strength: DeviceStrength,
    queue_a: VecDeque<PulseFrame>,
    queue_b: VecDeque<PulseFrame>,
}

impl<D: DeviceDriver> DeviceBridge<D> {
    /// Limits come from the driver.
    pub fn new(device: D) -> Self {
        let (limit_a, limit_b) = device.limits();
        Self::with_limits(device, limit_a, limit_b)
    }

    /// Use explicit limits, capped by what the driver reports.
    pub fn with_limits(device: D, limit_a: u32, limit_b: u32) -> Self {
        let (max_a, max_b) = device.limits();
        Self {
            strength: DeviceStrength::with_limits(limit_a.min(max_a), limit_b.min(max_b)),
            device,
            queue_a: VecDeque::new(),
            queue_b: VecDeque::new(),
        }
    }

    pub fn strength(&self) -> &DeviceStrength {
        &self.strength
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn queued(&self, channel: Channel) -> usize {
        self.queue(channel).len()
    }

    fn queue(&self, channel: Channel) -> &VecDeque<PulseFrame> {
        match channel {
            Channel::A => &self.queue_a,
            Channel::B => &self.queue_b,
        }
    }

    fn queue_mut(&mut self, channel: Channel) -> &mut VecDeque<PulseFrame> {
        match channel {
            Channel::A => &mut self.queue_a,
            Channel::B => &mut self.queue_b,
        }
    }

    /// Apply a strength command, clamped to the channel limit.
    pub fn apply_strength(&mut self, cmd: &StrengthCommand) -> Result<StrengthState, ClientError> {
        let state = self.strength.apply(cmd);
        self.device.set_strength(cmd.channel, state.current())?;
        tracing::debug!(
            channel = %cmd.channel,
            current = state.current(),
            maximum = state.maximum(),
            "strength applied"
        );
        Ok(state)
    }

    /// Append a whole batch behind whatever is already queued.
    pub fn enqueue(&mut self, batch: PulseBatch) {
        let channel = batch.channel;
        self.queue_mut(channel).extend(batch.frames);
        tracing::debug!(channel = %channel, queued = self.queued(channel), "pulse batch queued");
    }

    /// Drop queued frames and stop output on a channel.
    pub fn clear(&mut self, channel: Channel) -> Result<(), ClientError> {
        self.queue_mut(channel).clear();
        self.device.clear(channel)
    }

    /// Play the next frame on each channel. Returns the number of frames
    /// played.
    pub fn tick(&mut self) -> Result<usize, ClientError> {
        let mut played = 0;
        for channel in Channel::ALL {
            if let Some(frame) = self.queue_mut(channel).pop_front() {
                self.device.play(channel, frame)?;
                played += 1;
            }
        }
        Ok(played)
    }

    /// Apply one relay event. Returns `true` when device-observable state
    /// changed and the controller should get a fresh report.
    pub fn handle(&mut self, event: ClientEvent) -> Result<bool, ClientError> {
        match event {
            ClientEvent::StrengthCommand(cmd) => {
                self.apply_strength(&cmd)?;
                Ok(true)
            }
            ClientEvent::Pulse(batch) => {
                self.enqueue(batch);
                Ok(true)
            }
            ClientEvent::Clear(channel) => {
                self.clear(channel)?;
                Ok(true)
            }
            ClientEvent::PeerDisconnected => {
                tracing::info!("controller disconnected, stopping output");
                for channel in Channel::ALL {
                    self.clear(channel)?;
                }
                Ok(false)
            }
            ClientEvent::Error { code, message } => {
                tracing::warn!(?code, message = %message, "relay error");
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Serve relay events and play queued frames until the connection closes
    /// or `cancel` fires.
    pub async fn run(
        &mut self,
        client: &mut RelayClient,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = client.next_event() => {
                    match event {
                        ClientEvent::Closed => {
                            tracing::info!("relay connection closed");
                            return Ok(());
                        }
                        ClientEvent::Bound { peer } => {
                            tracing::info!(peer = %peer, "controller bound");
                            client.push_strength(&self.strength).await?;
                        }
                        event => {
                            if self.handle(event)? {
                                client.push_strength(&self.strength).await?;
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick()?;
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, MockDevice};
    use proptest::prelude::*;

    fn frames(n: u8) -> Vec<PulseFrame> {
        (0..n).map(|i| PulseFrame::uniform(10, i)).collect()
    }

    #[test]
    fn strength_clamps_to_limit() {
        let device = MockDevice::default();
        let mut bridge = DeviceBridge::new(device.clone());

        let state = bridge
            .apply_strength(&StrengthCommand::increase(Channel::A, 10))
            .unwrap();
        assert_eq!(state.current(), 10);

        let state = bridge
            .apply_strength(&StrengthCommand::set_to(Channel::A, 999))
            .unwrap();
        assert_eq!(state.current(), 100);
        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::SetStrength(Channel::A, 10),
                DeviceCall::SetStrength(Channel::A, 100),
            ]
        );
    }

    #[test]
    fn explicit_limits_are_capped_by_hardware() {
        let bridge = DeviceBridge::with_limits(MockDevice::new(50, 200), 80, 120);
        assert_eq!(bridge.strength().a.maximum(), 50);
        assert_eq!(bridge.strength().b.maximum(), 120);
    }

    #[test]
    fn batches_play_back_to_back_in_order() {
        let device = MockDevice::default();
        let mut bridge = DeviceBridge::new(device.clone());
        let first = frames(3);
        let second = frames(2);
        bridge.enqueue(PulseBatch::new(Channel::A, first.clone()));
        bridge.enqueue(PulseBatch::new(Channel::A, second.clone()));
        assert_eq!(bridge.queued(Channel::A), 5);

        while bridge.tick().unwrap() > 0 {}

        let expected: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(device.played(Channel::A), expected);
        assert!(device.played(Channel::B).is_empty());
    }

    #[test]
    fn channels_play_independently() {
        let device = MockDevice::default();
        let mut bridge = DeviceBridge::new(device.clone());
        bridge.enqueue(PulseBatch::new(Channel::A, frames(2)));
        bridge.enqueue(PulseBatch::new(Channel::B, frames(1)));
        assert_eq!(bridge.tick().unwrap(), 2);
        assert_eq!(bridge.tick().unwrap(), 1);
        assert_eq!(bridge.tick().unwrap(), 0);
    }

    #[test]
    fn clear_drops_only_that_channel() {
        let device = MockDevice::default();
        let mut bridge = DeviceBridge::new(device.clone());
        bridge.enqueue(PulseBatch::new(Channel::A, frames(4)));
        bridge.enqueue(PulseBatch::new(Channel::B, frames(4)));
        bridge.handle(ClientEvent::Clear(Channel::A)).unwrap();
        assert_eq!(bridge.queued(Channel::A), 0);
        assert_eq!(bridge.queued(Channel::B), 4);
        assert!(device.calls().contains(&DeviceCall::Clear(Channel::A)));
    }

    #[test]
    fn commands_request_state_report() {
        let mut bridge = DeviceBridge::new(MockDevice::default());
        let commands = [
            ClientEvent::StrengthCommand(StrengthCommand::increase(Channel::B, 1)),
            ClientEvent::Pulse(PulseBatch::new(Channel::B, frames(1))),
            ClientEvent::Clear(Channel::B),
        ];
        for event in commands {
            assert!(bridge.handle(event).unwrap());
        }
        assert!(!bridge.handle(ClientEvent::PeerDisconnected).unwrap());
        assert!(
            !bridge
                .handle(ClientEvent::HeartbeatAck {
                    timestamp: chrono::Utc::now()
                })
                .unwrap()
        );
    }

    #[test]
    fn peer_disconnect_stops_output() {
        let device = MockDevice::default();
        let mut bridge = DeviceBridge::new(device.clone());
        bridge.enqueue(PulseBatch::new(Channel::A, frames(3)));
        bridge.handle(ClientEvent::PeerDisconnected).unwrap();
        assert_eq!(bridge.queued(Channel::A), 0);
        assert_eq!(bridge.tick().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn strength_never_exceeds_limit(
            limit in 0u32..300,
            ops in prop::collection::vec((0u8..3, 0u32..1000), 0..50),
        ) {
            let mut bridge = DeviceBridge::new(MockDevice::new(limit, limit));
            for (op, value) in ops {
                let cmd = match op {
                    0 => StrengthCommand::increase(Channel::A, value),
                    1 => StrengthCommand::decrease(Channel::A, value),
                    _ => StrengthCommand::set_to(Channel::A, value),
                };
                let state = bridge.apply_strength(&cmd).unwrap();
                prop_assert!(state.current() <= limit);
            }
        }
    }
}
