//! dglink-client: both ends of a binding.
//!
//! [`RelayClient`] speaks the relay protocol for either role. On the device
//! side, [`DeviceBridge`] feeds relayed commands into a [`DeviceDriver`] and
//! plays pulse queues frame by frame.

pub mod bridge;
pub mod client;
pub mod device;
pub mod error;
pub mod link;

pub use bridge::{BridgeConfig, DeviceBridge};
pub use client::{ClientConfig, ClientEvent, RelayClient};
pub use device::{DeviceCall, DeviceDriver, MockDevice};
pub use error::ClientError;
pub use link::bind_url;
