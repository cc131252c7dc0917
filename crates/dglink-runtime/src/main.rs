//! dglink: relay server, device bridge and controller in one binary.

use clap::Parser;

mod cli;
mod cmd_bridge;
mod cmd_control;
mod cmd_relay;
mod signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("DGLINK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Relay(opts) => {
            let config = opts.resolve()?;
            cmd_relay::cmd_relay(config).await?;
        }
        cli::Command::Bridge(opts) => {
            cmd_bridge::cmd_bridge(opts).await?;
        }
        cli::Command::Control(opts) => {
            cmd_control::cmd_control(opts).await?;
        }
    }

    Ok(())
}
