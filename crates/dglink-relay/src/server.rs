use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use dglink_protocol::{ProtocolError, WireMessage};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::router::{Connection, Router};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// WebSocket relay. Each accepted connection becomes one session: it is
/// issued a `clientId`, may bind to another session, and from then on its
/// commands are routed to that peer.
pub struct RelayServer {
    config: RelayConfig,
    router: Router,
    cancel: CancellationToken,
}

impl RelayServer {
    pub fn new(config: RelayConfig, cancel: CancellationToken) -> Self {
        let router = Router::new(config.clone());
        Self::with_router(config, router, cancel)
    }

    /// Use a pre-built router, e.g. one whose registry has a custom id
    /// generator.
    pub fn with_router(config: RelayConfig, router: Router, cancel: CancellationToken) -> Self {
        Self {
            config,
            router,
            cancel,
        }
    }

    /// Set the maximum number of concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Bind the configured address and serve until the cancellation token
    /// fires.
    pub async fn run(&self) -> Result<(), RelayError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await?;
        Ok(())
    }

    /// Bind to the configured address and return the actual local address.
    /// Binding port 0 yields an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.config.listen).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            max_connections = self.config.max_connections,
            "relay listening"
        );
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener. On cancellation the
    /// registry is drained before this returns.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let slots = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!(error = %e, "tcp accept failed");
                        continue;
                    }
                },
                _ = self.cancel.cancelled() => break,
            };

            match Arc::clone(&slots).try_acquire_owned() {
                Ok(slot) => spawn_session(stream, peer, slot, self.router.clone()),
                Err(_) => tracing::warn!(
                    peer = %peer,
                    max = self.config.max_connections,
                    "relay full, refusing connection"
                ),
            }
        }

        tracing::info!("relay stopping");
        self.router.shutdown().await;
        Ok(())
    }
}

/// Upgrade an accepted socket and run its session on a new task. The slot
/// is held for the lifetime of the session.
fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    slot: OwnedSemaphorePermit,
    router: Router,
) {
    tokio::spawn(async move {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "websocket handshake failed");
                return;
            }
        };
        if let Err(e) = handle_connection(ws, peer, router).await {
            tracing::debug!(peer = %peer, error = %e, "session ended with error");
        }
        drop(slot);
    });
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    router: Router,
) -> Result<(), RelayError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (conn, mut outbound_rx) = match router.open().await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "session not opened");
            send(&mut ws_tx, &WireMessage::error(&e, None)).await?;
            let _ = ws_tx.close().await;
            return Err(e.into());
        }
    };
    tracing::info!(peer = %peer, client_id = %conn.id(), "client connected");

    let result = drive(&mut ws_tx, &mut ws_rx, &conn, &mut outbound_rx, &router).await;

    tracing::info!(peer = %peer, client_id = %conn.id(), "client disconnected");
    router.close(conn).await;
    let _ = ws_tx.close().await;
    result
}

async fn drive(
    ws_tx: &mut WsSink,
    ws_rx: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    conn: &Connection,
    outbound_rx: &mut mpsc::Receiver<WireMessage>,
    router: &Router,
) -> Result<(), RelayError> {
    send(
        ws_tx,
        &WireMessage::ClientId {
            client_id: conn.id().to_owned(),
        },
    )
    .await?;

    let closed = conn.handle().closed().clone();
    let max_violations = router.config().max_violations;
    let mut violations = 0u32;
    let mut liveness = tokio::time::interval(router.config().liveness_interval());
    liveness.tick().await;

    loop {
        tokio::select! {
            // --- incoming WebSocket message ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %conn.id(), error = %e, "read error, dropping client");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!(client_id = %conn.id(), "stream ended");
                        return Ok(());
                    }
                };

                let text = match msg {
                    Message::Text(t) => Ok(t),
                    Message::Binary(_) => Err(ProtocolError::MalformedMessage(
                        "binary frames are not supported".into(),
                    )),
                    Message::Close(_) => {
                        tracing::debug!(client_id = %conn.id(), "client sent close frame");
                        return Ok(());
                    }
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await?;
                        continue;
                    }
                    _ => continue,
                };

                router.touch(conn).await;
                match inbound(text) {
                    Ok(msg) => {
                        violations = 0;
                        if let Some(reply) = router.dispatch(conn, msg).await {
                            send(ws_tx, &reply).await?;
                        }
                    }
                    Err((e, id)) => {
                        violations += 1;
                        tracing::warn!(client_id = %conn.id(), violations, error = %e, "protocol violation");
                        send(ws_tx, &WireMessage::error(&e, id)).await?;
                        if violations > max_violations {
                            tracing::warn!(client_id = %conn.id(), "too many protocol violations, closing session");
                            return Ok(());
                        }
                    }
                }
            }

            // --- queued messages for this session ---
            Some(msg) = outbound_rx.recv() => {
                send(ws_tx, &msg).await?;
            }

            _ = liveness.tick() => {
                if router.is_expired(conn).await {
                    tracing::info!(client_id = %conn.id(), "heartbeat timeout");
                    return Ok(());
                }
            }

            _ = closed.cancelled() => {
                while let Ok(msg) = outbound_rx.try_recv() {
                    send(ws_tx, &msg).await?;
                }
                return Ok(());
            }
        }
    }
}

/// Decode a data frame into a message a client is allowed to send. Failures
/// carry the correlation id when the frame decoded far enough to have one.
fn inbound(
    text: Result<String, ProtocolError>,
) -> Result<WireMessage, (ProtocolError, Option<u64>)> {
    let msg = text
        .and_then(|text| WireMessage::decode(&text))
        .map_err(|e| (e, None))?;
    if msg.is_client_message() {
        Ok(msg)
    } else {
        Err((
            ProtocolError::UnexpectedMessage(msg.kind()),
            msg.correlation_id(),
        ))
    }
}

async fn send(ws_tx: &mut WsSink, msg: &WireMessage) -> Result<(), RelayError> {
    tracing::debug!(kind = msg.kind(), "send");
    ws_tx.send(Message::Text(msg.encode()?)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_can_be_constructed() {
        let server = RelayServer::new(RelayConfig::default(), CancellationToken::new());
        assert_eq!(server.config.max_connections, 64);
    }

    #[test]
    fn relay_only_messages_are_violations() {
        let ack = WireMessage::ack("strength", Some(4)).encode().unwrap();
        let (err, id) = inbound(Ok(ack)).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedMessage("ack"));
        assert_eq!(id, Some(4));

        let (err, _) = inbound(Ok(r#"{"type":"disconnected"}"#.into())).unwrap_err();
        assert_eq!(err.code().as_u16(), 403);
    }

    #[test]
    fn client_messages_pass_through() {
        let text = WireMessage::heartbeat_now().encode().unwrap();
        assert!(matches!(inbound(Ok(text)), Ok(WireMessage::Heartbeat { .. })));
        let (err, id) = inbound(Ok("{".into())).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
        assert_eq!(id, None);
    }

    #[test]
    fn server_custom_max_connections() {
        let server = RelayServer::new(RelayConfig::default(), CancellationToken::new())
            .with_max_connections(2);
        assert_eq!(server.config.max_connections, 2);
    }
}
