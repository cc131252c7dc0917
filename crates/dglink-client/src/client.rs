//! WebSocket client for the relay.
//!
//! A [`RelayClient`] owns three background tasks: a reader that resolves
//! pending requests and turns everything else into [`ClientEvent`]s, a
//! writer that serialises outbound messages, and a heartbeat ticker.
//! Requests carry a correlation id; their `ack`/`error`/`bind` reply is
//! matched back to the waiting caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use dglink_protocol::{
    BIND_BOUND, BIND_REGISTERED, Channel, Command, DeviceStrength, FeedbackButton,
    MAX_PULSE_FRAMES, ProtocolError, PulseBatch, StrengthCommand, WireMessage,
};

use crate::error::ClientError;

const EVENT_QUEUE_CAPACITY: usize = 256;
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

// ─── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay URL, e.g. `ws://127.0.0.1:8765`.
    pub url: String,
    pub heartbeat_interval_ms: u64,
    /// How long a request waits for its reply.
    pub response_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".into(),
            heartbeat_interval_ms: 20_000,
            response_timeout_ms: 5_000,
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────

/// Unsolicited traffic from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Another session bound to this one.
    Bound { peer: String },
    StrengthCommand(StrengthCommand),
    Pulse(PulseBatch),
    Clear(Channel),
    StrengthUpdate(DeviceStrength),
    /// A feedback button was pressed on the device side.
    Feedback(FeedbackButton),
    HeartbeatAck { timestamp: DateTime<Utc> },
    PeerDisconnected,
    Error { code: Option<u16>, message: String },
    /// The connection is gone; no further events follow.
    Closed,
}

impl ClientEvent {
    /// Map an uncorrelated relay message to an event. Returns `None` for
    /// messages that carry nothing for the application.
    fn from_message(msg: WireMessage) -> Option<Self> {
        match msg {
            WireMessage::Bind {
                target_id: Some(peer),
                message,
                ..
            } if message.as_deref() == Some(BIND_BOUND) => Some(Self::Bound { peer }),
            WireMessage::Bind { message, .. } => Some(Self::Error {
                code: None,
                message: message.unwrap_or_default(),
            }),
            msg @ (WireMessage::Strength { .. }
            | WireMessage::Pulse { .. }
            | WireMessage::Clear { .. }) => match Command::from_message(&msg, MAX_PULSE_FRAMES) {
                Ok(Some(Command::Strength(cmd))) => Some(Self::StrengthCommand(cmd)),
                Ok(Some(Command::Pulse(batch))) => Some(Self::Pulse(batch)),
                Ok(Some(Command::Clear(channel))) => Some(Self::Clear(channel)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping invalid command from relay");
                    None
                }
            },
            WireMessage::StrengthUpdate {
                a,
                b,
                a_limit,
                b_limit,
            } => Some(Self::StrengthUpdate(DeviceStrength::from_parts(
                a, b, a_limit, b_limit,
            ))),
            WireMessage::Feedback { button } => Some(Self::Feedback(button)),
            WireMessage::Heartbeat { timestamp } => Some(Self::HeartbeatAck { timestamp }),
            WireMessage::Disconnected => Some(Self::PeerDisconnected),
            WireMessage::Error { code, message, .. } => Some(Self::Error { code, message }),
            WireMessage::ClientId { .. } | WireMessage::Ack { .. } | WireMessage::Unbind { .. } => {
                None
            }
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────

type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<WireMessage>>>>;

pub struct RelayClient {
    client_id: String,
    config: ClientConfig,
    outbound: mpsc::Sender<WireMessage>,
    pending: Pending,
    events: mpsc::Receiver<ClientEvent>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect and wait for the relay to issue this session's identifier.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(config.url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let greeting = tokio::time::timeout(config.response_timeout(), next_message(&mut ws_rx))
            .await
            .map_err(|_| ProtocolError::DeliveryTimeout)??;

        let client_id = match greeting {
            Some(WireMessage::ClientId { client_id }) => client_id,
            Some(WireMessage::Error { code, message, .. }) => {
                return Err(ClientError::Rejected { code, message });
            }
            Some(other) => {
                return Err(ClientError::UnexpectedReply {
                    request: "connect",
                    reply: other.kind(),
                });
            }
            None => return Err(ClientError::Closed),
        };
        tracing::info!(url = %config.url, client_id = %client_id, "connected to relay");

        let cancel = CancellationToken::new();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireMessage>(OUTBOUND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let writer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = outbound_rx.recv() => {
                            let Some(msg) = msg else { break };
                            let text = match msg.encode() {
                                Ok(text) => text,
                                Err(e) => {
                                    tracing::error!(error = %e, "failed to encode message");
                                    continue;
                                }
                            };
                            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                                tracing::debug!(error = %e, "write failed, stopping writer");
                                break;
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
                let _ = ws_tx.close().await;
            })
        };

        let reader = {
            let cancel = cancel.clone();
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        frame = ws_rx.next() => frame,
                        _ = cancel.cancelled() => break,
                    };
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "read error");
                            break;
                        }
                    };
                    let msg = match WireMessage::decode(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::warn!(error = %e, "undecodable message from relay");
                            continue;
                        }
                    };
                    tracing::debug!(kind = msg.kind(), "received");

                    if let Some(id) = msg.correlation_id() {
                        let waiter = pending.lock().await.remove(&id);
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(msg);
                            continue;
                        }
                    }
                    // The reader never waits on the event queue.
                    if let Some(event) = ClientEvent::from_message(msg) {
                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(event)) => {
                                tracing::warn!(?event, "event queue full, dropping event");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
                // Dropping the senders fails every outstanding request.
                pending.lock().await.clear();
                // If this does not fit, the closed channel reports `Closed`.
                let _ = event_tx.try_send(ClientEvent::Closed);
                cancel.cancel();
            })
        };

        let heartbeat = {
            let cancel = cancel.clone();
            let outbound = outbound_tx.clone();
            let period = config.heartbeat_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if outbound.send(WireMessage::heartbeat_now()).await.is_err() {
                                break;
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            })
        };

        Ok(Self {
            client_id,
            config,
            outbound: outbound_tx,
            pending,
            events: event_rx,
            next_id: AtomicU64::new(1),
            cancel,
            tasks: vec![writer, reader, heartbeat],
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identity-only bind: confirm the issued id without naming a target.
    pub async fn register(&self) -> Result<(), ClientError> {
        let client_id = self.client_id.clone();
        let reply = self
            .request(|id| WireMessage::Bind {
                client_id,
                target_id: None,
                message: None,
                id,
            })
            .await?;
        expect_bind(reply, BIND_REGISTERED)
    }

    /// Bind this session to `target`.
    pub async fn bind(&self, target: &str) -> Result<(), ClientError> {
        let client_id = self.client_id.clone();
        let target_id = target.to_owned();
        let reply = self
            .request(|id| WireMessage::Bind {
                client_id,
                target_id: Some(target_id),
                message: None,
                id,
            })
            .await?;
        expect_bind(reply, BIND_BOUND)?;
        tracing::info!(client_id = %self.client_id, target = %target, "bound");
        Ok(())
    }

    pub async fn unbind(&self) -> Result<(), ClientError> {
        let reply = self.request(|id| WireMessage::Unbind { id }).await?;
        expect_ack(reply, "unbind")
    }

    /// Relay a strength command; resolves once the peer's queue accepted it.
    pub async fn send_strength(&self, cmd: StrengthCommand) -> Result<(), ClientError> {
        self.send_command(Command::Strength(cmd)).await
    }

    pub async fn send_pulse(&self, batch: PulseBatch) -> Result<(), ClientError> {
        self.send_command(Command::Pulse(batch)).await
    }

    pub async fn send_clear(&self, channel: Channel) -> Result<(), ClientError> {
        self.send_command(Command::Clear(channel)).await
    }

    async fn send_command(&self, command: Command) -> Result<(), ClientError> {
        let reply = self.request(|id| command.to_message(id)).await?;
        expect_ack(reply, command.to_message(None).kind())
    }

    /// Report device state to the bound controller. Not acknowledged.
    pub async fn push_strength(&self, state: &DeviceStrength) -> Result<(), ClientError> {
        self.send(WireMessage::strength_update(state)).await
    }

    /// Report a pressed feedback button to the bound controller. Not
    /// acknowledged.
    pub async fn send_feedback(&self, button: FeedbackButton) -> Result<(), ClientError> {
        self.send(WireMessage::Feedback { button }).await
    }

    /// Send one heartbeat now. The echo arrives as [`ClientEvent::HeartbeatAck`].
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        self.send(WireMessage::heartbeat_now()).await
    }

    /// Next event from the relay. Returns [`ClientEvent::Closed`] once the
    /// connection is gone.
    pub async fn next_event(&mut self) -> ClientEvent {
        self.events.recv().await.unwrap_or(ClientEvent::Closed)
    }

    /// Wait until a controller binds to this session and return its id.
    /// Events other than the bind notice are discarded while waiting.
    pub async fn wait_for_bind(&mut self, timeout: Duration) -> Result<String, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.next_event())
                .await
                .map_err(|_| ClientError::BindTimeout(timeout))?;
            match event {
                ClientEvent::Bound { peer } => {
                    tracing::info!(client_id = %self.client_id, peer = %peer, "controller bound");
                    return Ok(peer);
                }
                ClientEvent::Closed => return Err(ClientError::Closed),
                other => tracing::debug!(event = ?other, "ignored while waiting for bind"),
            }
        }
    }

    /// Close the connection and wait for the background tasks to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        tracing::info!(client_id = %self.client_id, "connection closed");
    }

    async fn send(&self, msg: WireMessage) -> Result<(), ClientError> {
        self.outbound.send(msg).await.map_err(|_| ClientError::Closed)
    }

    /// Send a correlated request and wait for its reply. An `error` reply
    /// becomes [`ClientError::Rejected`].
    async fn request(
        &self,
        build: impl FnOnce(Option<u64>) -> WireMessage,
    ) -> Result<WireMessage, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(build(Some(id))).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.config.response_timeout(), rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ProtocolError::DeliveryTimeout.into());
            }
        };

        match reply {
            WireMessage::Error { code, message, .. } => Err(ClientError::Rejected { code, message }),
            reply => Ok(reply),
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_message(ws_rx: &mut WsStream) -> Result<Option<WireMessage>, ClientError> {
    while let Some(frame) = ws_rx.next().await {
        if let Message::Text(text) = frame? {
            return Ok(Some(WireMessage::decode(&text)?));
        }
    }
    Ok(None)
}

fn expect_bind(reply: WireMessage, wanted: &str) -> Result<(), ClientError> {
    match reply {
        WireMessage::Bind { message, .. } => match message {
            Some(m) if m == wanted => Ok(()),
            Some(m) => Err(ClientError::BindRejected(m)),
            None => Err(ClientError::BindRejected(String::new())),
        },
        other => Err(ClientError::UnexpectedReply {
            request: "bind",
            reply: other.kind(),
        }),
    }
}

fn expect_ack(reply: WireMessage, request: &'static str) -> Result<(), ClientError> {
    match reply {
        WireMessage::Ack { .. } => Ok(()),
        other => Err(ClientError::UnexpectedReply {
            request,
            reply: other.kind(),
        }),
    }
}
