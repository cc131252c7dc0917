//! `dglink control`: bind to a device and send it one command, or watch
//! its state.

use std::time::Duration;

use dglink_client::{ClientEvent, RelayClient};
use dglink_protocol::{DeviceStrength, PulseBatch, StrengthCommand};

use crate::cli::{ControlAction, ControlOpts};
use crate::signal::shutdown_signal;

/// How long to wait for the device to report state after a command.
const UPDATE_WAIT: Duration = Duration::from_secs(2);

pub async fn cmd_control(opts: ControlOpts) -> anyhow::Result<()> {
    let mut client = RelayClient::connect(opts.connect.client_config()).await?;
    client.bind(&opts.target).await?;
    tracing::info!(target = %opts.target, "bound to device");

    match opts.action {
        ControlAction::Strength { channel, op, value } => {
            // The device reports its state once on bind; skip that report.
            let _ = next_update(&mut client, UPDATE_WAIT).await;
            client
                .send_strength(StrengthCommand::new(channel, op.into(), value))
                .await?;
            match next_update(&mut client, UPDATE_WAIT).await {
                Some(state) => println!("{}", format_state(&state)),
                None => println!("ok (no state report)"),
            }
        }
        ControlAction::Pulse { channel, frames } => {
            let batch = PulseBatch::from_hex(channel, frames.as_slice())?;
            let duration = batch.duration();
            client.send_pulse(batch).await?;
            println!("queued {} frames ({} ms)", frames.len(), duration.as_millis());
        }
        ControlAction::Clear { channel } => {
            client.send_clear(channel).await?;
            println!("cleared channel {channel}");
        }
        ControlAction::Watch => watch(&mut client).await,
    }

    client.close().await;
    Ok(())
}

async fn watch(client: &mut RelayClient) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = client.next_event() => match event {
                ClientEvent::StrengthUpdate(state) => println!("{}", format_state(&state)),
                ClientEvent::Feedback(button) => println!("feedback {button}"),
                ClientEvent::PeerDisconnected => {
                    println!("device disconnected");
                    return;
                }
                ClientEvent::Closed => return,
                ClientEvent::Error { code, message } => {
                    eprintln!("error {}: {message}", code.unwrap_or_default());
                }
                _ => {}
            },
            () = &mut shutdown => return,
        }
    }
}

/// Wait up to `wait` for the next strength report.
async fn next_update(client: &mut RelayClient, wait: Duration) -> Option<DeviceStrength> {
    tokio::time::timeout(wait, async {
        loop {
            match client.next_event().await {
                ClientEvent::StrengthUpdate(state) => return Some(state),
                ClientEvent::Closed | ClientEvent::PeerDisconnected => return None,
                _ => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

fn format_state(state: &DeviceStrength) -> String {
    format!(
        "A {}/{}  B {}/{}",
        state.a.current(),
        state.a.maximum(),
        state.b.current(),
        state.b.maximum()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_line_shows_both_channels() {
        let state = DeviceStrength::from_parts(10, 0, 100, 50);
        assert_eq!(format_state(&state), "A 10/100  B 0/50");
    }
}
