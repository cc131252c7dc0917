//! dglink-relay: the WebSocket relay between controllers and devices.
//!
//! [`registry`] owns session identity and the binding state machine,
//! [`router`] turns inbound messages into replies and peer deliveries, and
//! [`server`] runs the accept loop and per-connection handlers.

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use registry::{BindOutcome, BindingState, Session, SessionRegistry};
pub use router::{Connection, Router, SessionHandle};
pub use server::RelayServer;
