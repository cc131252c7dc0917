//! `dglink relay`: run the WebSocket relay until ctrl-c / SIGTERM.

use tokio_util::sync::CancellationToken;

use dglink_relay::{RelayConfig, RelayServer};

use crate::signal::shutdown_signal;

pub async fn cmd_relay(config: RelayConfig) -> anyhow::Result<()> {
    tracing::info!(
        listen = %config.listen,
        delivery_timeout_ms = config.delivery_timeout_ms,
        heartbeat_timeout_ms = config.heartbeat_timeout_ms,
        "dglink relay starting"
    );

    let cancel = CancellationToken::new();
    let server = RelayServer::new(config, cancel.clone());
    let (listener, addr) = server.bind().await?;
    let router = server.router().clone();
    let mut server_handle = tokio::spawn(async move { server.serve(listener).await });
    println!("relay listening on ws://{addr}");

    tokio::select! {
        () = shutdown_signal() => {
            {
                let registry = router.registry().lock().await;
                tracing::info!(
                    sessions = registry.len(),
                    bound = registry.bound_count(),
                    "shutdown requested"
                );
            }
            cancel.cancel();
            server_handle.await??;
        }
        result = &mut server_handle => {
            tracing::warn!("relay exited unexpectedly");
            result??;
        }
    }

    tracing::info!("relay stopped");
    Ok(())
}
