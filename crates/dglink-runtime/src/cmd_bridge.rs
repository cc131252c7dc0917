//! `dglink bridge`: act as the device end of a binding.

use anyhow::bail;
use tokio_util::sync::CancellationToken;

use dglink_client::{DeviceBridge, MockDevice, RelayClient, bind_url};

use crate::cli::BridgeOpts;
use crate::signal::shutdown_signal;

pub async fn cmd_bridge(opts: BridgeOpts) -> anyhow::Result<()> {
    if !opts.mock {
        bail!("no hardware driver is built in; pass --mock to use the in-memory device");
    }

    let config = opts.bridge_config();
    let device = MockDevice::new(config.limit_a, config.limit_b);
    let mut bridge = DeviceBridge::new(device.clone());

    let client_config = opts.connect.client_config();
    let mut client = RelayClient::connect(client_config.clone()).await?;
    client.register().await?;

    println!("client id: {}", client.client_id());
    println!("pair link: {}", bind_url(&client_config.url, client.client_id()));

    if let Some(wait) = opts.bind_timeout() {
        let peer = client.wait_for_bind(wait).await?;
        println!("controller bound: {peer}");
        client.push_strength(bridge.strength()).await?;
    }

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.cancel();
    });

    bridge.run(&mut client, config.tick(), cancel).await?;

    let state = bridge.strength();
    tracing::info!(
        a = state.a.current(),
        b = state.b.current(),
        calls = device.calls().len(),
        "bridge stopped"
    );
    client.close().await;
    Ok(())
}
