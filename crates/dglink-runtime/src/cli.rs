//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use dglink_client::{BridgeConfig, ClientConfig};
use dglink_protocol::{Channel, StrengthOp};
use dglink_relay::{RelayConfig, RelayError};

#[derive(Parser)]
#[command(name = "dglink", about = "bridge-control relay for DG-LAB style devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the WebSocket relay
    Relay(RelayOpts),
    /// Connect as a device and apply relayed commands
    Bridge(BridgeOpts),
    /// Connect as a controller, bind to a device and drive it
    Control(ControlOpts),
}

#[derive(clap::Args)]
pub struct RelayOpts {
    /// TOML config file; flags below override its values
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Listen address (default: 127.0.0.1:8765)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Bounded wait for room in a peer's queue, in milliseconds
    #[arg(long)]
    pub delivery_timeout_ms: Option<u64>,

    /// Close sessions silent for this long, in milliseconds
    #[arg(long)]
    pub heartbeat_timeout_ms: Option<u64>,
}

impl RelayOpts {
    /// Config file (or defaults) with flag overrides applied.
    pub fn resolve(&self) -> Result<RelayConfig, RelayError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(ms) = self.delivery_timeout_ms {
            config.delivery_timeout_ms = ms;
        }
        if let Some(ms) = self.heartbeat_timeout_ms {
            config.heartbeat_timeout_ms = ms;
        }
        Ok(config)
    }
}

#[derive(clap::Args)]
pub struct ConnectOpts {
    /// Relay URL
    #[arg(long, env = "DGLINK_URL", default_value = "ws://127.0.0.1:8765")]
    pub url: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "20000")]
    pub heartbeat_interval_ms: u64,

    /// How long a request waits for its reply, in milliseconds
    #[arg(long, default_value = "5000")]
    pub response_timeout_ms: u64,
}

impl ConnectOpts {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            response_timeout_ms: self.response_timeout_ms,
        }
    }
}

#[derive(clap::Args)]
pub struct BridgeOpts {
    #[command(flatten)]
    pub connect: ConnectOpts,

    /// Drive an in-memory device that logs every call
    #[arg(long)]
    pub mock: bool,

    /// Channel A strength limit
    #[arg(long, default_value = "100")]
    pub limit_a: u32,

    /// Channel B strength limit
    #[arg(long, default_value = "100")]
    pub limit_b: u32,

    /// Playback tick in milliseconds
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Give up if no controller binds within this many seconds
    #[arg(long)]
    pub bind_timeout_secs: Option<u64>,
}

impl BridgeOpts {
    pub fn bind_timeout(&self) -> Option<Duration> {
        self.bind_timeout_secs.map(Duration::from_secs)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            limit_a: self.limit_a,
            limit_b: self.limit_b,
            tick_ms: self.tick_ms,
        }
    }
}

#[derive(clap::Args)]
pub struct ControlOpts {
    #[command(flatten)]
    pub connect: ConnectOpts,

    /// Client id of the device to bind to
    #[arg(long, short = 't')]
    pub target: String,

    #[command(subcommand)]
    pub action: ControlAction,
}

#[derive(Subcommand)]
pub enum ControlAction {
    /// Change channel strength
    Strength {
        channel: Channel,
        op: OpArg,
        value: u32,
    },
    /// Send a batch of 16-hex-digit frames
    Pulse {
        channel: Channel,
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Stop output on a channel
    Clear { channel: Channel },
    /// Print device state updates and feedback until interrupted
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OpArg {
    Increase,
    Decrease,
    Set,
}

impl From<OpArg> for StrengthOp {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Increase => StrengthOp::Increase,
            OpArg::Decrease => StrengthOp::Decrease,
            OpArg::Set => StrengthOp::SetTo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "listen = \"0.0.0.0:9000\"\nmax_violations = 2\n").unwrap();

        let cli = Cli::try_parse_from([
            "dglink",
            "relay",
            "--config",
            path.to_str().unwrap(),
            "--delivery-timeout-ms",
            "250",
        ])
        .unwrap();
        let Command::Relay(opts) = cli.command else {
            panic!("expected relay");
        };
        let config = opts.resolve().unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.max_violations, 2);
        assert_eq!(config.delivery_timeout_ms, 250);
    }

    #[test]
    fn relay_without_config_uses_defaults() {
        let cli = Cli::try_parse_from(["dglink", "relay"]).unwrap();
        let Command::Relay(opts) = cli.command else {
            panic!("expected relay");
        };
        assert_eq!(opts.resolve().unwrap(), RelayConfig::default());
    }

    #[test]
    fn control_strength_parses_channel_and_op() {
        let cli = Cli::try_parse_from([
            "dglink", "control", "--target", "abc", "strength", "a", "set", "30",
        ])
        .unwrap();
        let Command::Control(opts) = cli.command else {
            panic!("expected control");
        };
        assert_eq!(opts.target, "abc");
        let ControlAction::Strength { channel, op, value } = opts.action else {
            panic!("expected strength");
        };
        assert_eq!(channel, Channel::A);
        assert_eq!(StrengthOp::from(op), StrengthOp::SetTo);
        assert_eq!(value, 30);
    }

    #[test]
    fn control_pulse_requires_frames() {
        assert!(
            Cli::try_parse_from(["dglink", "control", "-t", "abc", "pulse", "B"]).is_err()
        );
    }

    #[test]
    fn bridge_bind_timeout_in_seconds() {
        let cli =
            Cli::try_parse_from(["dglink", "bridge", "--mock", "--bind-timeout-secs", "30"]).unwrap();
        let Command::Bridge(opts) = cli.command else {
            panic!("expected bridge");
        };
        assert_eq!(opts.bind_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn bridge_defaults() {
        let cli = Cli::try_parse_from(["dglink", "bridge", "--mock"]).unwrap();
        let Command::Bridge(opts) = cli.command else {
            panic!("expected bridge");
        };
        assert!(opts.mock);
        assert_eq!(opts.bind_timeout(), None);
        assert_eq!(opts.bridge_config(), BridgeConfig::default());
        assert_eq!(opts.connect.client_config().heartbeat_interval_ms, 20_000);
    }
}
