//! Per-session command routing.
//!
//! The router turns each inbound [`WireMessage`] from a session into at most
//! one direct reply plus queued deliveries to the bound peer. Deliveries go
//! through a per-session forwarder task so they reach the peer in submission
//! order while the reader stays free to answer heartbeats.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dglink_protocol::{BIND_BOUND, BIND_REGISTERED, Command, ProtocolError, WireMessage};

use crate::config::RelayConfig;
use crate::registry::{BindOutcome, Removed, SessionRegistry};

pub type SharedRegistry = Arc<Mutex<SessionRegistry<SessionHandle>>>;

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// How the rest of the relay reaches one connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<WireMessage>,
    closed: CancellationToken,
}

impl SessionHandle {
    pub fn new(outbound: mpsc::Sender<WireMessage>, closed: CancellationToken) -> Self {
        Self { outbound, closed }
    }

    /// Enqueue a message, waiting at most `timeout` for queue space.
    pub async fn deliver(&self, msg: WireMessage, timeout: Duration) -> Result<(), ProtocolError> {
        match self.outbound.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(ProtocolError::DeliveryTimeout),
            Err(SendTimeoutError::Closed(_)) => Err(ProtocolError::PeerDisconnected),
        }
    }

    /// Ask the connection to shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Delivery {
    to: SessionHandle,
    message: WireMessage,
    ack: Option<AckTo>,
}

/// Sender-side acknowledgement owed once a delivery is enqueued.
struct AckTo {
    command: &'static str,
    id: Option<u64>,
}

/// A registered session as seen by its own connection handler.
pub struct Connection {
    id: String,
    handle: SessionHandle,
    deliveries: mpsc::Sender<Delivery>,
    forwarder: JoinHandle<()>,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Router {
    registry: SharedRegistry,
    config: Arc<RelayConfig>,
    epoch: Instant,
    closing: CancellationToken,
}

impl Router {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_registry(SessionRegistry::new(), config)
    }

    pub fn with_registry(registry: SessionRegistry<SessionHandle>, config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            config: Arc::new(config),
            epoch: Instant::now(),
            closing: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register a new session. Returns the connection plus the receiver its
    /// handler must drain onto the transport.
    pub async fn open(&self) -> Result<(Connection, mpsc::Receiver<WireMessage>), ProtocolError> {
        let capacity = self.config.queue_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let handle = SessionHandle::new(outbound_tx, CancellationToken::new());

        let id = {
            let mut registry = self.registry.lock().await;
            if self.closing.is_cancelled() {
                return Err(ProtocolError::ShuttingDown);
            }
            registry.register(handle.clone(), self.now_ms())?
        };

        let (deliveries_tx, deliveries_rx) = mpsc::channel(capacity);
        let forwarder = tokio::spawn(run_forwarder(
            id.clone(),
            deliveries_rx,
            handle.clone(),
            self.config.delivery_timeout(),
        ));

        tracing::info!(client_id = %id, "session registered");
        Ok((
            Connection {
                id,
                handle,
                deliveries: deliveries_tx,
                forwarder,
            },
            outbound_rx,
        ))
    }

    /// Record inbound traffic for liveness.
    pub async fn touch(&self, conn: &Connection) {
        self.registry.lock().await.touch(&conn.id, self.now_ms());
    }

    /// Handle one decoded inbound message. The returned message, if any, goes
    /// straight back to the sender.
    pub async fn dispatch(&self, conn: &Connection, msg: WireMessage) -> Option<WireMessage> {
        tracing::debug!(client_id = %conn.id, kind = msg.kind(), "dispatch");

        match msg {
            WireMessage::Heartbeat { .. } => Some(WireMessage::heartbeat_now()),
            WireMessage::Bind {
                client_id,
                target_id,
                id,
                ..
            } => Some(self.bind(conn, &client_id, target_id.as_deref(), id).await),
            WireMessage::Unbind { id } => Some(self.unbind(conn, id).await),
            WireMessage::StrengthUpdate { .. } | WireMessage::Feedback { .. } => {
                self.relay(conn, msg, None).await
            }
            WireMessage::Strength { .. } | WireMessage::Pulse { .. } | WireMessage::Clear { .. } => {
                let id = msg.correlation_id();
                match Command::from_message(&msg, self.config.max_pulse_frames) {
                    Ok(Some(command)) => {
                        let ack = AckTo {
                            command: msg.kind(),
                            id,
                        };
                        self.relay(conn, command.to_message(None), Some(ack)).await
                    }
                    Ok(None) => None,
                    Err(e) => {
                        tracing::debug!(client_id = %conn.id, error = %e, "command rejected");
                        Some(WireMessage::error(&e, id))
                    }
                }
            }
            other => {
                let err = ProtocolError::UnexpectedMessage(other.kind());
                Some(WireMessage::error(&err, other.correlation_id()))
            }
        }
    }

    async fn bind(
        &self,
        conn: &Connection,
        client_id: &str,
        target_id: Option<&str>,
        id: Option<u64>,
    ) -> WireMessage {
        let result = if client_id != conn.id {
            Err(ProtocolError::InvalidClientId(client_id.to_owned()))
        } else {
            self.registry.lock().await.bind(&conn.id, target_id)
        };

        let (target, message) = match result {
            Ok(BindOutcome::Registered) => {
                tracing::debug!(client_id = %conn.id, "identity confirmed, awaiting bind");
                (None, BIND_REGISTERED)
            }
            Ok(BindOutcome::Unchanged) => (target_id.map(str::to_owned), BIND_BOUND),
            Ok(BindOutcome::Bound {
                target_id,
                target,
            }) => {
                tracing::info!(client_id = %conn.id, target_id = %target_id, "sessions bound");
                let notice = WireMessage::Bind {
                    client_id: target_id.clone(),
                    target_id: Some(conn.id.clone()),
                    message: Some(BIND_BOUND.to_owned()),
                    id: None,
                };
                self.notify(conn, target, notice);
                (Some(target_id), BIND_BOUND)
            }
            Err(e) => {
                tracing::debug!(client_id = %conn.id, error = %e, "bind rejected");
                (target_id.map(str::to_owned), e.reason())
            }
        };

        WireMessage::Bind {
            client_id: conn.id.clone(),
            target_id: target,
            message: Some(message.to_owned()),
            id,
        }
    }

    async fn unbind(&self, conn: &Connection, id: Option<u64>) -> WireMessage {
        let result = self.registry.lock().await.unbind(&conn.id);
        match result {
            Ok(teardown) => {
                tracing::info!(client_id = %conn.id, peer = %teardown.peer_id, "binding released");
                self.notify(conn, teardown.peer, WireMessage::Disconnected);
                WireMessage::ack("unbind", id)
            }
            Err(e) => WireMessage::error(&e, id),
        }
    }

    async fn relay(
        &self,
        conn: &Connection,
        message: WireMessage,
        ack: Option<AckTo>,
    ) -> Option<WireMessage> {
        let id = ack.as_ref().and_then(|a| a.id);
        let peer = self.registry.lock().await.peer_of(&conn.id);
        let to = match peer {
            Ok((_, handle)) => handle,
            Err(e) => return Some(WireMessage::error(&e, id)),
        };

        match conn.deliveries.try_send(Delivery { to, message, ack }) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                tracing::warn!(client_id = %conn.id, "relay queue full, rejecting command");
                Some(WireMessage::error(&ProtocolError::DeliveryTimeout, id))
            }
        }
    }

    /// Queue a notification behind any pending relays; if the queue is
    /// unavailable, deliver it from a detached task instead.
    fn notify(&self, conn: &Connection, to: SessionHandle, message: WireMessage) {
        let delivery = Delivery {
            to,
            message,
            ack: None,
        };
        if let Err(e) = conn.deliveries.try_send(delivery) {
            let delivery = e.into_inner();
            let timeout = self.config.delivery_timeout();
            tokio::spawn(async move {
                let kind = delivery.message.kind();
                if let Err(e) = delivery.to.deliver(delivery.message, timeout).await {
                    tracing::debug!(kind, error = %e, "notification dropped");
                }
            });
        }
    }

    /// Whether the session has gone quiet for longer than the heartbeat
    /// timeout. A session that is no longer registered counts as expired.
    pub async fn is_expired(&self, conn: &Connection) -> bool {
        let registry = self.registry.lock().await;
        match registry.get(&conn.id) {
            Some(session) => {
                session
                    .last_seen_ms
                    .saturating_add(self.config.heartbeat_timeout_ms)
                    < self.now_ms()
            }
            None => true,
        }
    }

    /// Remove the session. A bound peer is released and told `disconnected`
    /// before this returns.
    pub async fn close(&self, conn: Connection) {
        conn.forwarder.abort();
        let removed = self.registry.lock().await.remove(&conn.id);
        let Some(Removed { teardown, .. }) = removed else {
            return;
        };
        tracing::info!(client_id = %conn.id, "session closed");
        if let Some(teardown) = teardown {
            tracing::info!(client_id = %conn.id, peer = %teardown.peer_id, "notifying peer of disconnect");
            if let Err(e) = teardown
                .peer
                .deliver(WireMessage::Disconnected, self.config.delivery_timeout())
                .await
            {
                tracing::warn!(peer = %teardown.peer_id, error = %e, "disconnect notice not delivered");
            }
        }
    }

    /// Drain the registry: bound sessions are told `disconnected`, then every
    /// connection is asked to close. Notices share one `delivery_timeout`
    /// budget.
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let sessions = self.registry.lock().await.drain();
        tracing::info!(sessions = sessions.len(), "draining sessions");

        let timeout = self.config.delivery_timeout();
        let notices = sessions
            .iter()
            .filter(|session| session.state.is_bound())
            .map(|session| async move {
                if let Err(e) = session
                    .handle
                    .deliver(WireMessage::Disconnected, timeout)
                    .await
                {
                    tracing::warn!(client_id = %session.id, error = %e, "disconnect notice not delivered on shutdown");
                }
            });
        join_all(notices).await;

        for session in &sessions {
            session.handle.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

async fn run_forwarder(
    client_id: String,
    mut deliveries: mpsc::Receiver<Delivery>,
    own: SessionHandle,
    timeout: Duration,
) {
    while let Some(delivery) = deliveries.recv().await {
        let kind = delivery.message.kind();
        let result = delivery.to.deliver(delivery.message, timeout).await;
        match (result, delivery.ack) {
            (Ok(()), Some(ack)) => {
                let _ = own.outbound.send(WireMessage::ack(ack.command, ack.id)).await;
            }
            (Ok(()), None) => {}
            (Err(e), Some(ack)) => {
                tracing::warn!(client_id = %client_id, kind, error = %e, "relay failed");
                let _ = own.outbound.send(WireMessage::error(&e, ack.id)).await;
            }
            (Err(e), None) => {
                tracing::debug!(client_id = %client_id, kind, error = %e, "notification dropped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dglink_protocol::{Channel, FeedbackButton, StrengthOp};

    fn router_with(config: RelayConfig) -> Router {
        let mut next = 0u32;
        let registry = SessionRegistry::with_id_generator(move || {
            next += 1;
            format!("s{next}")
        });
        Router::with_registry(registry, config)
    }

    async fn recv(rx: &mut mpsc::Receiver<WireMessage>) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("channel closed")
    }

    fn bind_req(client: &str, target: Option<&str>) -> WireMessage {
        WireMessage::Bind {
            client_id: client.into(),
            target_id: target.map(str::to_owned),
            message: None,
            id: None,
        }
    }

    fn strength(op: StrengthOp, value: u32, id: u64) -> WireMessage {
        WireMessage::Strength {
            channel: Channel::A,
            op,
            value,
            id: Some(id),
        }
    }

    /// Two sessions, the second bound to the first. The bind notice on the
    /// first session's queue is consumed.
    async fn bound_pair(
        router: &Router,
    ) -> (
        (Connection, mpsc::Receiver<WireMessage>),
        (Connection, mpsc::Receiver<WireMessage>),
    ) {
        let (app, mut app_rx) = router.open().await.unwrap();
        let (ctl, ctl_rx) = router.open().await.unwrap();
        let reply = router
            .dispatch(&ctl, bind_req(ctl.id(), Some(app.id())))
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Bind { ref message, .. } if message.as_deref() == Some("bound")));
        let notice = recv(&mut app_rx).await;
        assert!(matches!(notice, WireMessage::Bind { .. }));
        ((app, app_rx), (ctl, ctl_rx))
    }

    #[tokio::test]
    async fn heartbeat_is_echoed_with_server_time() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();
        let reply = router
            .dispatch(&conn, WireMessage::heartbeat_now())
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Heartbeat { .. }));
    }

    #[tokio::test]
    async fn bind_notifies_target() {
        let router = router_with(RelayConfig::default());
        let (app, mut app_rx) = router.open().await.unwrap();
        let (ctl, _ctl_rx) = router.open().await.unwrap();

        let reply = router
            .dispatch(&ctl, bind_req("s2", Some("s1")))
            .await
            .unwrap();
        assert_eq!(
            reply,
            WireMessage::Bind {
                client_id: "s2".into(),
                target_id: Some("s1".into()),
                message: Some("bound".into()),
                id: None,
            }
        );
        assert_eq!(
            recv(&mut app_rx).await,
            WireMessage::Bind {
                client_id: "s1".into(),
                target_id: Some("s2".into()),
                message: Some("bound".into()),
                id: None,
            }
        );
        let registry = router.registry().lock().await;
        assert_eq!(registry.get(app.id()).unwrap().state.peer(), Some("s2"));
    }

    #[tokio::test]
    async fn identity_only_bind_reports_registered() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();
        let reply = router.dispatch(&conn, bind_req("s1", None)).await.unwrap();
        let WireMessage::Bind {
            message, target_id, ..
        } = reply
        else {
            panic!("expected bind result");
        };
        assert_eq!(message.as_deref(), Some("registered"));
        assert!(target_id.is_none());
    }

    #[tokio::test]
    async fn bind_failures_carry_reason() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();

        let reply = router
            .dispatch(&conn, bind_req("s1", Some("ghost")))
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Bind { ref message, .. } if message.as_deref() == Some("notFound")));

        let reply = router
            .dispatch(&conn, bind_req("someone-else", Some("ghost")))
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Bind { ref message, .. } if message.as_deref() == Some("invalidClientId")));
    }

    #[tokio::test]
    async fn command_from_unbound_session_is_not_bound() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();
        let reply = router
            .dispatch(&conn, strength(StrengthOp::Increase, 10, 7))
            .await
            .unwrap();
        assert_eq!(
            reply,
            WireMessage::error(&ProtocolError::NotBound, Some(7))
        );
    }

    #[tokio::test]
    async fn strength_is_relayed_and_acknowledged() {
        let router = router_with(RelayConfig::default());
        let ((_app, mut app_rx), (ctl, mut ctl_rx)) = bound_pair(&router).await;

        let reply = router
            .dispatch(&ctl, strength(StrengthOp::Increase, 10, 1))
            .await;
        assert!(reply.is_none());

        assert_eq!(
            recv(&mut app_rx).await,
            WireMessage::Strength {
                channel: Channel::A,
                op: StrengthOp::Increase,
                value: 10,
                id: None,
            }
        );
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::ack("strength", Some(1)));
    }

    #[tokio::test]
    async fn strength_update_flows_back_without_ack() {
        let router = router_with(RelayConfig::default());
        let ((app, mut app_rx), (_ctl, mut ctl_rx)) = bound_pair(&router).await;
        let update = WireMessage::StrengthUpdate {
            a: 10,
            b: 0,
            a_limit: 100,
            b_limit: 100,
        };
        assert!(router.dispatch(&app, update.clone()).await.is_none());
        assert_eq!(recv(&mut ctl_rx).await, update);
        assert!(app_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pulse_batches_arrive_in_submission_order() {
        let router = router_with(RelayConfig::default());
        let ((_app, mut app_rx), (ctl, mut ctl_rx)) = bound_pair(&router).await;

        let p1 = vec!["0a0a0a0a01010101".to_string(), "0a0a0a0a02020202".to_string()];
        let p2 = vec!["0a0a0a0a03030303".to_string()];
        for (i, frames) in [p1.clone(), p2.clone()].into_iter().enumerate() {
            let msg = WireMessage::Pulse {
                channel: Channel::B,
                frames,
                id: Some(i as u64),
            };
            assert!(router.dispatch(&ctl, msg).await.is_none());
        }

        let WireMessage::Pulse { frames: first, .. } = recv(&mut app_rx).await else {
            panic!("expected pulse");
        };
        let WireMessage::Pulse { frames: second, .. } = recv(&mut app_rx).await else {
            panic!("expected pulse");
        };
        assert_eq!(first, p1);
        assert_eq!(second, p2);
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::ack("pulse", Some(0)));
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::ack("pulse", Some(1)));
    }

    #[tokio::test]
    async fn invalid_frames_rejected_before_relay() {
        let router = router_with(RelayConfig::default());
        let ((_app, mut app_rx), (ctl, _ctl_rx)) = bound_pair(&router).await;
        let msg = WireMessage::Pulse {
            channel: Channel::A,
            frames: vec!["xyz".into()],
            id: Some(4),
        };
        let reply = router.dispatch(&ctl, msg).await.unwrap();
        let WireMessage::Error { code, id, .. } = reply else {
            panic!("expected error");
        };
        assert_eq!(code, Some(403));
        assert_eq!(id, Some(4));
        assert!(app_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversized_batch_is_too_long() {
        let router = router_with(RelayConfig {
            max_pulse_frames: 2,
            ..RelayConfig::default()
        });
        let ((_app, _app_rx), (ctl, _ctl_rx)) = bound_pair(&router).await;
        let msg = WireMessage::Pulse {
            channel: Channel::A,
            frames: vec!["0000000000000000".into(); 3],
            id: None,
        };
        let reply = router.dispatch(&ctl, msg).await.unwrap();
        assert!(matches!(reply, WireMessage::Error { code: Some(405), .. }));
    }

    #[tokio::test]
    async fn stalled_peer_yields_delivery_timeout() {
        let router = router_with(RelayConfig {
            queue_capacity: 1,
            delivery_timeout_ms: 50,
            ..RelayConfig::default()
        });
        let ((_app, _app_rx), (ctl, mut ctl_rx)) = bound_pair(&router).await;

        // Nobody drains the app queue: the first command fills it.
        assert!(router.dispatch(&ctl, strength(StrengthOp::SetTo, 5, 1)).await.is_none());
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::ack("strength", Some(1)));

        let reply = router.dispatch(&ctl, strength(StrengthOp::SetTo, 6, 2)).await;
        let msg = match reply {
            Some(msg) => msg,
            None => recv(&mut ctl_rx).await,
        };
        assert_eq!(msg, WireMessage::error(&ProtocolError::DeliveryTimeout, Some(2)));
    }

    #[tokio::test]
    async fn unbind_notifies_peer_once() {
        let router = router_with(RelayConfig::default());
        let ((app, mut app_rx), (ctl, _ctl_rx)) = bound_pair(&router).await;

        let reply = router
            .dispatch(&ctl, WireMessage::Unbind { id: Some(3) })
            .await
            .unwrap();
        assert_eq!(reply, WireMessage::ack("unbind", Some(3)));
        assert_eq!(recv(&mut app_rx).await, WireMessage::Disconnected);

        let registry = router.registry().lock().await;
        assert!(!registry.get(app.id()).unwrap().state.is_bound());
        assert!(!registry.get(ctl.id()).unwrap().state.is_bound());
    }

    #[tokio::test]
    async fn close_notifies_bound_peer_and_frees_id() {
        let router = router_with(RelayConfig::default());
        let ((app, mut app_rx), (ctl, _ctl_rx)) = bound_pair(&router).await;
        let ctl_id = ctl.id().to_owned();

        router.close(ctl).await;
        assert_eq!(recv(&mut app_rx).await, WireMessage::Disconnected);
        assert!(app_rx.try_recv().is_err());

        let registry = router.registry().lock().await;
        assert!(registry.get(&ctl_id).is_none());
        assert!(!registry.get(app.id()).unwrap().state.is_bound());
    }

    #[tokio::test]
    async fn shutdown_notifies_and_closes_everyone() {
        let router = router_with(RelayConfig::default());
        let ((app, mut app_rx), (ctl, mut ctl_rx)) = bound_pair(&router).await;
        let (lone, mut lone_rx) = router.open().await.unwrap();

        router.shutdown().await;
        assert_eq!(recv(&mut app_rx).await, WireMessage::Disconnected);
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::Disconnected);
        assert!(lone_rx.try_recv().is_err());
        for conn in [&app, &ctl, &lone] {
            assert!(conn.handle().closed().is_cancelled());
            assert!(router.is_expired(conn).await);
        }
        assert!(router.registry().lock().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_waits_for_room_in_full_queue() {
        let router = router_with(RelayConfig {
            queue_capacity: 1,
            delivery_timeout_ms: 2_000,
            ..RelayConfig::default()
        });
        let ((app, mut app_rx), (ctl, mut ctl_rx)) = bound_pair(&router).await;

        // Fill the app queue, then free a slot only after shutdown started.
        assert!(router.dispatch(&ctl, strength(StrengthOp::SetTo, 5, 1)).await.is_none());
        assert_eq!(recv(&mut ctl_rx).await, WireMessage::ack("strength", Some(1)));
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let first = recv(&mut app_rx).await;
            let second = recv(&mut app_rx).await;
            (first, second)
        });

        router.shutdown().await;
        let (first, second) = drain.await.unwrap();
        assert!(matches!(first, WireMessage::Strength { .. }));
        assert_eq!(second, WireMessage::Disconnected);
        assert!(app.handle().closed().is_cancelled());
    }

    #[tokio::test]
    async fn feedback_is_relayed_to_bound_peer() {
        let router = router_with(RelayConfig::default());
        let ((app, _app_rx), (_ctl, mut ctl_rx)) = bound_pair(&router).await;
        let feedback = WireMessage::Feedback {
            button: FeedbackButton::A3,
        };
        assert!(router.dispatch(&app, feedback.clone()).await.is_none());
        assert_eq!(recv(&mut ctl_rx).await, feedback);
    }

    #[tokio::test]
    async fn feedback_from_unbound_session_is_not_bound() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();
        let reply = router
            .dispatch(
                &conn,
                WireMessage::Feedback {
                    button: FeedbackButton::B0,
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Error { code: Some(402), .. }));
    }

    #[tokio::test]
    async fn open_after_shutdown_is_refused() {
        let router = router_with(RelayConfig::default());
        router.shutdown().await;
        let err = router.open().await.err().unwrap();
        assert_eq!(err, ProtocolError::ShuttingDown);
    }

    #[tokio::test]
    async fn quiet_session_expires() {
        let router = router_with(RelayConfig {
            heartbeat_timeout_ms: 20,
            ..RelayConfig::default()
        });
        let (conn, _rx) = router.open().await.unwrap();
        assert!(!router.is_expired(&conn).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(router.is_expired(&conn).await);
        router.touch(&conn).await;
        assert!(!router.is_expired(&conn).await);
    }

    #[tokio::test]
    async fn client_cannot_send_server_messages() {
        let router = router_with(RelayConfig::default());
        let (conn, _rx) = router.open().await.unwrap();
        let reply = router
            .dispatch(&conn, WireMessage::Disconnected)
            .await
            .unwrap();
        assert!(matches!(reply, WireMessage::Error { code: Some(403), .. }));
    }
}
