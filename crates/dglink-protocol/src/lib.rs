//! dglink-protocol: wire types for the bridge-control protocol.
//! Message codec, pulse frame encoding, strength state and the error taxonomy.
//! Pure library: no IO, no async.

pub mod error;
pub mod message;
pub mod pulse;
pub mod types;

pub use error::{ErrorCode, ProtocolError};
pub use message::{BIND_BOUND, BIND_REGISTERED, Command, WireMessage};
pub use pulse::{FRAME_DURATION, FRAME_HEX_LEN, MAX_PULSE_FRAMES, PulseBatch, PulseFrame};
pub use types::{
    Channel, DeviceStrength, FeedbackButton, StrengthCommand, StrengthOp, StrengthState,
};
