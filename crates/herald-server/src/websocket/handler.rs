//! STOMP command dispatch for one connection.
//!
//! [`handle_frame`] is called by the read loop once per parsed frame, in
//! arrival order. It owns the handshake: a connection starts anonymous and
//! is bound to a user by the first `CONNECT`/`STOMP` whose bearer token
//! validates.

use std::sync::Arc;
use std::time::Duration;

use herald_auth::{TokenManager, bearer_token};
use herald_stomp::{Command, Frame};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broker::Broker;
use super::connection::{CLOSE_NORMAL, CLOSE_POLICY, Connection};
use super::heartbeat::{Heartbeat, HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::STOMP_AUTH_FAILURES_TOTAL;
use crate::publisher::Publisher;

/// Shared collaborators every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Subscription registry.
    pub broker: Arc<Broker>,
    /// Push API, used for online-count events.
    pub publisher: Publisher,
    /// Validates handshake tokens.
    pub tokens: Arc<TokenManager>,
    /// Server limits and heartbeat policy.
    pub config: Arc<ServerConfig>,
}

impl SessionContext {
    /// Build a context whose publisher fronts `broker`.
    pub fn new(broker: Arc<Broker>, tokens: Arc<TokenManager>, config: Arc<ServerConfig>) -> Self {
        Self {
            publisher: Publisher::new(broker.clone()),
            broker,
            tokens,
            config,
        }
    }
}

/// What the read loop should do after a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Close the socket and end the session.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

/// Mutable per-connection state owned by the read loop.
pub struct SessionState {
    connection: Arc<Connection>,
    cancel: CancellationToken,
    heartbeat: Option<(JoinHandle<HeartbeatResult>, CancellationToken)>,
    idle_timeout: Option<Duration>,
    next_subscription: u64,
}

impl SessionState {
    /// State for a fresh, anonymous connection. Tasks spawned for the
    /// session are cancelled with `cancel`.
    pub fn new(connection: Arc<Connection>, cancel: CancellationToken) -> Self {
        Self {
            connection,
            cancel,
            heartbeat: None,
            idle_timeout: None,
            next_subscription: 0,
        }
    }

    /// The connection this state belongs to.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Longest silence tolerated from the client, once negotiated.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Whether a heartbeat emitter is running.
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Stop the heartbeat emitter. Returns `false` if none was running.
    pub fn stop_heartbeat(&mut self) -> bool {
        let Some((handle, cancel)) = self.heartbeat.take() else {
            return false;
        };
        cancel.cancel();
        drop(handle);
        true
    }

    fn start_heartbeat(&mut self, period: Duration) {
        let _ = self.stop_heartbeat();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_heartbeat(self.connection.clone(), period, cancel.clone()));
        self.heartbeat = Some((handle, cancel));
    }

    /// Next `sub-N` id not already taken by a client-chosen id.
    fn generate_subscription_id(&mut self) -> String {
        loop {
            let id = format!("sub-{}", self.next_subscription);
            self.next_subscription += 1;
            if !self.connection.has_subscription(&id) {
                return id;
            }
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        let _ = self.stop_heartbeat();
    }
}

/// Apply one inbound frame.
pub async fn handle_frame(frame: &Frame, state: &mut SessionState, ctx: &SessionContext) -> Flow {
    match &frame.command {
        Command::Connect | Command::Stomp => handle_connect(frame, state, ctx).await,
        Command::Subscribe => handle_subscribe(frame, state, ctx),
        Command::Unsubscribe => handle_unsubscribe(frame, state, ctx),
        Command::Disconnect => {
            if let Some(receipt) = frame.header("receipt") {
                let _ = state.connection.send_receipt(receipt);
            }
            debug!(conn_id = %state.connection.id(), "client disconnect");
            Flow::Close {
                code: CLOSE_NORMAL,
                reason: "",
            }
        }
        other => {
            debug!(conn_id = %state.connection.id(), command = other.as_str(), "ignoring frame");
            Flow::Continue
        }
    }
}

async fn handle_connect(frame: &Frame, state: &mut SessionState, ctx: &SessionContext) -> Flow {
    let conn = state.connection.clone();
    if conn.is_authenticated() {
        let _ = conn.send_error("Already connected");
        return Flow::Continue;
    }

    let Some(token) = frame.header("authorization").and_then(bearer_token) else {
        return reject(&conn, "missing_token", "Missing authorization token");
    };
    let Some(claims) = ctx.tokens.try_get_payload(token).await else {
        return reject(&conn, "invalid_token", "Invalid or expired token");
    };

    conn.authenticate(claims.user_id);
    ctx.broker.register_connection(&conn);

    let heartbeat = Heartbeat::negotiate(frame.header("heart-beat"), ctx.config.heartbeat_floor);
    let _ = conn.send_connected(heartbeat.header_value());
    if let Some(period) = heartbeat.send {
        state.start_heartbeat(period);
    }
    state.idle_timeout = heartbeat.idle_timeout(ctx.config.heartbeat_grace_factor);

    info!(
        conn_id = %conn.id(),
        user_id = claims.user_id,
        username = %claims.username,
        heartbeat_ms = ?heartbeat.header_value(),
        "client authenticated"
    );
    let _ = ctx.publisher.online_count_changed();
    Flow::Continue
}

fn reject(conn: &Connection, reason: &'static str, message: &str) -> Flow {
    counter!(STOMP_AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    warn!(conn_id = %conn.id(), reason, "handshake rejected");
    let _ = conn.send_error(message);
    Flow::Close {
        code: CLOSE_POLICY,
        reason: "authentication failed",
    }
}

fn handle_subscribe(frame: &Frame, state: &mut SessionState, ctx: &SessionContext) -> Flow {
    let conn = state.connection.clone();
    if !conn.is_authenticated() {
        let _ = conn.send_error("Not authenticated");
        return Flow::Continue;
    }
    let Some(destination) = frame.header("destination").filter(|d| !d.is_empty()) else {
        let _ = conn.send_error("Missing destination header");
        return Flow::Continue;
    };
    let id = match frame.header("id").filter(|id| !id.is_empty()) {
        Some(id) => id.to_owned(),
        None => state.generate_subscription_id(),
    };
    ctx.broker.subscribe(&conn, &id, destination);
    Flow::Continue
}

fn handle_unsubscribe(frame: &Frame, state: &SessionState, ctx: &SessionContext) -> Flow {
    let conn = &state.connection;
    if !conn.is_authenticated() {
        let _ = conn.send_error("Not authenticated");
        return Flow::Continue;
    }
    match frame.header("id") {
        Some(id) => {
            let _ = ctx.broker.unsubscribe(conn, id);
        }
        None => {
            let _ = conn.send_error("Missing id header");
        }
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use herald_auth::{MemoryTokenStore, TokenConfig, TokenSubject};
    use herald_core::ConnectionId;
    use tokio::sync::mpsc;

    struct Harness {
        ctx: SessionContext,
        state: SessionState,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryTokenStore::new());
            let tokens = Arc::new(TokenManager::new(TokenConfig::new(b"handler-test-secret".to_vec()), store));
            let ctx = SessionContext::new(Arc::new(Broker::new()), tokens, Arc::new(ServerConfig::default()));
            let (tx, rx) = mpsc::channel(64);
            let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
            ctx.broker.register_connection(&conn);
            let state = SessionState::new(conn, CancellationToken::new());
            Self { ctx, state, rx }
        }

        async fn access_token(&self, user_id: i64) -> String {
            let subject = TokenSubject {
                user_id,
                dept_id: None,
                data_scope: 0,
                username: format!("user{user_id}"),
                authorities: vec![],
            };
            self.ctx.tokens.issue(&subject).await.unwrap().access_token
        }

        async fn send(&mut self, frame: Frame) -> Flow {
            handle_frame(&frame, &mut self.state, &self.ctx).await
        }

        fn next(&mut self) -> Frame {
            match self.rx.try_recv().unwrap() {
                Outbound::Frame(text) => Frame::parse(&text).unwrap(),
                other => panic!("expected a frame, got {other:?}"),
            }
        }

        async fn connect(&mut self, user_id: i64) {
            let token = self.access_token(user_id).await;
            let flow = self
                .send(Frame::new(Command::Connect).with_header("Authorization", format!("Bearer {token}")))
                .await;
            assert_eq!(flow, Flow::Continue);
            assert_eq!(self.next().command, Command::Connected);
        }
    }

    #[tokio::test]
    async fn connect_with_valid_token_authenticates() {
        let mut h = Harness::new();
        h.connect(7).await;
        assert_eq!(h.state.connection().user_id(), Some(7));
        assert_eq!(h.ctx.broker.online_user_count(), 1);
        assert!(!h.state.has_heartbeat());
        assert_eq!(h.state.idle_timeout(), None);
    }

    #[tokio::test]
    async fn connect_without_token_is_policy_close() {
        let mut h = Harness::new();
        let flow = h.send(Frame::new(Command::Connect)).await;
        assert_eq!(
            flow,
            Flow::Close {
                code: CLOSE_POLICY,
                reason: "authentication failed"
            }
        );
        let error = h.next();
        assert_eq!(error.command, Command::Error);
        assert_eq!(error.header("message"), Some("Missing authorization token"));
        assert!(!h.state.connection().is_authenticated());
    }

    #[tokio::test]
    async fn connect_with_bad_token_is_policy_close() {
        let mut h = Harness::new();
        let flow = h
            .send(Frame::new(Command::Stomp).with_header("authorization", "Bearer not.a.jwt"))
            .await;
        assert!(matches!(flow, Flow::Close { code: CLOSE_POLICY, .. }));
        assert_eq!(h.next().header("message"), Some("Invalid or expired token"));
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() {
        let mut h = Harness::new();
        let token = h.access_token(3).await;
        let _ = h.ctx.tokens.invalidate_all_sessions(3).await.unwrap();
        let flow = h
            .send(Frame::new(Command::Connect).with_header("Authorization", format!("Bearer {token}")))
            .await;
        assert!(matches!(flow, Flow::Close { code: CLOSE_POLICY, .. }));
    }

    #[tokio::test]
    async fn second_connect_is_an_error_but_not_fatal() {
        let mut h = Harness::new();
        h.connect(1).await;
        let flow = h.send(Frame::new(Command::Connect)).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.next().header("message"), Some("Already connected"));
        assert_eq!(h.state.connection().user_id(), Some(1));
    }

    #[tokio::test]
    async fn connect_negotiates_heartbeat() {
        let mut h = Harness::new();
        let token = h.access_token(1).await;
        let _ = h
            .send(
                Frame::new(Command::Connect)
                    .with_header("Authorization", format!("Bearer {token}"))
                    .with_header("heart-beat", "4000,10000"),
            )
            .await;
        let connected = h.next();
        assert_eq!(connected.header("heart-beat"), Some("10000,4000"));
        assert!(h.state.has_heartbeat());
        assert_eq!(h.state.idle_timeout(), Some(Duration::from_secs(12)));
        assert!(h.state.stop_heartbeat());
        assert!(!h.state.stop_heartbeat());
    }

    #[tokio::test]
    async fn subscribe_requires_authentication() {
        let mut h = Harness::new();
        let flow = h
            .send(Frame::new(Command::Subscribe).with_header("destination", "/topic/dict"))
            .await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.next().header("message"), Some("Not authenticated"));
        assert_eq!(h.ctx.broker.subscriber_count("/topic/dict"), 0);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe() {
        let mut h = Harness::new();
        h.connect(1).await;
        let _ = h
            .send(
                Frame::new(Command::Subscribe)
                    .with_header("id", "sub-1")
                    .with_header("destination", "/topic/dict"),
            )
            .await;
        assert_eq!(h.ctx.broker.subscriber_count("/topic/dict"), 1);

        let _ = h.send(Frame::new(Command::Unsubscribe).with_header("id", "sub-1")).await;
        assert_eq!(h.ctx.broker.subscriber_count("/topic/dict"), 0);

        let flow = h.send(Frame::new(Command::Unsubscribe).with_header("id", "nope")).await;
        assert_eq!(flow, Flow::Continue);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_without_id_generates_one() {
        let mut h = Harness::new();
        h.connect(1).await;
        let _ = h
            .send(Frame::new(Command::Subscribe).with_header("destination", "/topic/a"))
            .await;
        let _ = h
            .send(Frame::new(Command::Subscribe).with_header("destination", "/topic/b"))
            .await;
        let conn = h.state.connection();
        assert_eq!(conn.subscription_for("/topic/a").as_deref(), Some("sub-0"));
        assert_eq!(conn.subscription_for("/topic/b").as_deref(), Some("sub-1"));
    }

    #[tokio::test]
    async fn generated_id_skips_client_chosen_ids() {
        let mut h = Harness::new();
        h.connect(1).await;
        let _ = h
            .send(
                Frame::new(Command::Subscribe)
                    .with_header("id", "sub-0")
                    .with_header("destination", "/topic/a"),
            )
            .await;
        let _ = h
            .send(Frame::new(Command::Subscribe).with_header("destination", "/topic/b"))
            .await;

        assert_eq!(h.ctx.broker.subscriber_count("/topic/a"), 1);
        assert_eq!(h.ctx.broker.subscriber_count("/topic/b"), 1);
        let conn = h.state.connection();
        assert_eq!(conn.subscription_for("/topic/a").as_deref(), Some("sub-0"));
        assert_eq!(conn.subscription_for("/topic/b").as_deref(), Some("sub-1"));
    }

    #[tokio::test]
    async fn subscribe_without_destination_is_an_error() {
        let mut h = Harness::new();
        h.connect(1).await;
        let _ = h.send(Frame::new(Command::Subscribe).with_header("id", "x")).await;
        assert_eq!(h.next().header("message"), Some("Missing destination header"));
    }

    #[tokio::test]
    async fn disconnect_sends_receipt_then_closes() {
        let mut h = Harness::new();
        let flow = h
            .send(Frame::new(Command::Disconnect).with_header("receipt", "77"))
            .await;
        assert_eq!(
            flow,
            Flow::Close {
                code: CLOSE_NORMAL,
                reason: ""
            }
        );
        let receipt = h.next();
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.header("receipt-id"), Some("77"));
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let mut h = Harness::new();
        let flow = h.send(Frame::new(Command::Other("SEND".into()))).await;
        assert_eq!(flow, Flow::Continue);
        assert!(h.rx.try_recv().is_err());
    }
}
