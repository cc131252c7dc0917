//! Relay configuration, loadable from TOML. Every field has a default so a
//! partial (or empty) file is valid.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use dglink_protocol::MAX_PULSE_FRAMES;

use crate::error::RelayError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub listen: SocketAddr,
    /// Concurrent connections accepted before new ones are dropped.
    pub max_connections: usize,
    /// How long a relayed command may wait for room in the peer's queue.
    pub delivery_timeout_ms: u64,
    /// A session with no inbound traffic for this long is closed.
    pub heartbeat_timeout_ms: u64,
    /// Consecutive malformed messages tolerated before the session is closed.
    pub max_violations: u32,
    /// Capacity of each per-session queue.
    pub queue_capacity: usize,
    pub max_pulse_frames: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8765)),
            max_connections: 64,
            delivery_timeout_ms: 5_000,
            heartbeat_timeout_ms: 60_000,
            max_violations: 5,
            queue_capacity: 64,
            max_pulse_frames: MAX_PULSE_FRAMES,
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, RelayError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// How often each connection checks its own liveness.
    pub fn liveness_interval(&self) -> Duration {
        (self.heartbeat_timeout() / 4).max(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.max_pulse_frames, 100);
    }

    #[test]
    fn partial_file_overrides_fields() {
        let cfg = RelayConfig::from_toml_str(
            r#"
            listen = "0.0.0.0:9000"
            delivery_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen.port(), 9000);
        assert_eq!(cfg.delivery_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.max_connections, 64);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = RelayConfig::from_toml_str("listen_port = 1").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "max_violations = 2\n").unwrap();
        let cfg = RelayConfig::load(&path).unwrap();
        assert_eq!(cfg.max_violations, 2);
    }

    #[test]
    fn liveness_interval_has_floor() {
        let cfg = RelayConfig {
            heartbeat_timeout_ms: 8,
            ..RelayConfig::default()
        };
        assert_eq!(cfg.liveness_interval(), Duration::from_millis(10));
    }
}
