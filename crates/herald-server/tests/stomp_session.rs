//! End-to-end tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use herald_auth::{MemoryTokenStore, TokenConfig, TokenManager, TokenSubject};
use herald_server::websocket::connection::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY, CLOSE_TOO_BIG};
use herald_server::{HeraldServer, NoticeTargets, ServerConfig};
use herald_stomp::{Command, Frame};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    url: String,
    server: HeraldServer,
    tokens: Arc<TokenManager>,
}

impl TestServer {
    async fn boot(config: ServerConfig) -> Self {
        let tokens = Arc::new(TokenManager::new(
            TokenConfig::new(b"integration-secret".to_vec()),
            Arc::new(MemoryTokenStore::new()),
        ));
        let server = HeraldServer::new(config, tokens.clone());
        let (addr, _handle) = server.listen().await.unwrap();
        let url = format!("ws://{addr}{}", server.config().ws_path);
        Self { url, server, tokens }
    }

    async fn default() -> Self {
        Self::boot(ServerConfig::default()).await
    }

    async fn token(&self, user_id: i64) -> String {
        let subject = TokenSubject {
            user_id,
            dept_id: Some(1),
            data_scope: 1,
            username: format!("user{user_id}"),
            authorities: vec!["ROLE_USER".into()],
        };
        self.tokens.issue(&subject).await.unwrap().access_token
    }

    async fn open(&self) -> WsStream {
        let (ws, _) = connect_async(self.url.as_str()).await.unwrap();
        ws
    }

    /// Open a socket and complete the handshake as `user_id`.
    async fn connect(&self, user_id: i64) -> WsStream {
        let mut ws = self.open().await;
        let token = self.token(user_id).await;
        send(&mut ws, &connect_frame(&token)).await;
        let connected = next_frame(&mut ws).await.unwrap();
        assert_eq!(connected.command, Command::Connected);
        ws
    }

    async fn wait_for(&self, what: &str, check: impl Fn(&HeraldServer) -> bool) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while !check(&self.server) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_for_subscribers(&self, destination: &str, count: usize) {
        self.wait_for(destination, |s| s.broker().subscriber_count(destination) == count)
            .await;
    }
}

fn connect_frame(token: &str) -> Frame {
    Frame::new(Command::Connect)
        .with_header("accept-version", "1.2")
        .with_header("Authorization", format!("Bearer {token}"))
}

fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header("id", id)
        .with_header("destination", destination)
}

async fn send(ws: &mut WsStream, frame: &Frame) {
    send_text(ws, &frame.encode()).await;
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text)).await.unwrap();
}

/// Next text payload, skipping control frames. `None` once the socket closes.
async fn next_text(ws: &mut WsStream) -> Option<String> {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.expect("timed out waiting for message")?;
        match msg.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Next STOMP frame, skipping heartbeats.
async fn next_frame(ws: &mut WsStream) -> Option<Frame> {
    loop {
        let text = next_text(ws).await?;
        if text == "\n" {
            continue;
        }
        return Some(Frame::parse(&text).expect("server sent an unparsable frame"));
    }
}

/// Read until the close frame and return its code.
async fn close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.expect("timed out waiting for close")?;
        match msg {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    let res = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no message, got {res:?}");
}

fn body(frame: &Frame) -> Value {
    serde_json::from_str(&frame.body).unwrap()
}

#[tokio::test]
async fn subscribe_then_broadcast_delivers_message() {
    let t = TestServer::default().await;
    let mut ws = t.connect(1).await;
    send(&mut ws, &subscribe_frame("sub-1", "/topic/dict")).await;
    t.wait_for_subscribers("/topic/dict", 1).await;

    assert_eq!(t.server.publisher().dict_changed("sys_user_sex"), 1);

    let msg = next_frame(&mut ws).await.unwrap();
    assert_eq!(msg.command, Command::Message);
    assert_eq!(msg.header("destination"), Some("/topic/dict"));
    assert_eq!(msg.header("subscription"), Some("sub-1"));
    assert_eq!(msg.header("content-type"), Some("application/json"));
    assert_eq!(body(&msg), json!({"dictCode": "sys_user_sex"}));
}

#[tokio::test]
async fn connected_frame_carries_version() {
    let t = TestServer::default().await;
    let mut ws = t.open().await;
    let token = t.token(9).await;
    send(&mut ws, &connect_frame(&token)).await;
    let connected = next_frame(&mut ws).await.unwrap();
    assert_eq!(connected.command, Command::Connected);
    assert_eq!(connected.header("version"), Some("1.2"));
    assert_eq!(connected.header("heart-beat"), Some("0,0"));
}

#[tokio::test]
async fn frames_in_one_chunk_are_all_dispatched() {
    let t = TestServer::default().await;
    let mut ws = t.open().await;
    let token = t.token(1).await;
    let chunk = format!(
        "{}{}{}",
        connect_frame(&token).encode(),
        subscribe_frame("a", "/topic/a").encode(),
        subscribe_frame("b", "/topic/b").encode(),
    );
    send_text(&mut ws, &chunk).await;

    assert_eq!(next_frame(&mut ws).await.unwrap().command, Command::Connected);
    t.wait_for_subscribers("/topic/a", 1).await;
    t.wait_for_subscribers("/topic/b", 1).await;
}

#[tokio::test]
async fn frame_split_across_chunks_is_reassembled() {
    let t = TestServer::default().await;
    let mut ws = t.open().await;
    let token = t.token(1).await;
    let encoded = connect_frame(&token).encode();
    let (head, tail) = encoded.split_at(10);
    send_text(&mut ws, head).await;
    send_text(&mut ws, tail).await;
    assert_eq!(next_frame(&mut ws).await.unwrap().command, Command::Connected);
}

#[tokio::test]
async fn missing_token_gets_error_and_policy_close() {
    let t = TestServer::default().await;
    let mut ws = t.open().await;
    send(&mut ws, &Frame::new(Command::Connect)).await;

    let error = next_frame(&mut ws).await.unwrap();
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.header("message"), Some("Missing authorization token"));
    assert_eq!(close_code(&mut ws).await, Some(CLOSE_POLICY));
    t.wait_for("unregister", |s| s.broker().connection_count() == 0).await;
}

#[tokio::test]
async fn invalidated_token_is_refused() {
    let t = TestServer::default().await;
    let token = t.token(5).await;
    let header = format!("Bearer {token}");
    t.tokens.invalidate(Some(header.as_str())).await.unwrap();

    let mut ws = t.open().await;
    send(&mut ws, &connect_frame(&token)).await;
    assert_eq!(next_frame(&mut ws).await.unwrap().command, Command::Error);
    assert_eq!(close_code(&mut ws).await, Some(CLOSE_POLICY));
}

#[tokio::test]
async fn subscribe_before_connect_is_rejected_but_not_fatal() {
    let t = TestServer::default().await;
    let mut ws = t.open().await;
    send(&mut ws, &subscribe_frame("s", "/topic/dict")).await;
    let error = next_frame(&mut ws).await.unwrap();
    assert_eq!(error.header("message"), Some("Not authenticated"));

    let token = t.token(1).await;
    send(&mut ws, &connect_frame(&token)).await;
    assert_eq!(next_frame(&mut ws).await.unwrap().command, Command::Connected);
}

#[tokio::test]
async fn malformed_frame_gets_error_and_session_continues() {
    let t = TestServer::default().await;
    let mut ws = t.connect(1).await;
    send_text(&mut ws, " \0").await;
    let error = next_frame(&mut ws).await.unwrap();
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.header("message"), Some("Malformed frame"));

    send(&mut ws, &subscribe_frame("s", "/topic/notice")).await;
    t.wait_for_subscribers("/topic/notice", 1).await;
}

#[tokio::test]
async fn send_to_user_reaches_only_that_user() {
    let t = TestServer::default().await;
    let mut alice = t.connect(1).await;
    let mut alice_tablet = t.connect(1).await;
    let mut bob = t.connect(2).await;
    for ws in [&mut alice, &mut alice_tablet, &mut bob] {
        send(ws, &subscribe_frame("q", "/user/queue/message")).await;
    }
    t.wait_for_subscribers("/user/queue/message", 3).await;

    let notice = json!({"noticeId": 11, "title": "Reboot at noon"});
    let sent = t
        .server
        .publisher()
        .notice_published(&NoticeTargets::Users(vec![1]), &notice);
    assert_eq!(sent, 2);

    for ws in [&mut alice, &mut alice_tablet] {
        let msg = next_frame(ws).await.unwrap();
        assert_eq!(msg.header("destination"), Some("/user/queue/message"));
        assert_eq!(body(&msg), notice);
    }
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let t = TestServer::default().await;
    let mut ws = t.connect(1).await;
    send(&mut ws, &subscribe_frame("n", "/topic/notice")).await;
    t.wait_for_subscribers("/topic/notice", 1).await;
    send(&mut ws, &Frame::new(Command::Unsubscribe).with_header("id", "n")).await;
    t.wait_for_subscribers("/topic/notice", 0).await;

    assert_eq!(t.server.publisher().broadcast("/topic/notice", &json!({})), 0);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn online_count_follows_connects_and_disconnects() {
    let t = TestServer::default().await;
    let mut watcher = t.connect(1).await;
    send(&mut watcher, &subscribe_frame("oc", "/topic/online-count")).await;
    t.wait_for_subscribers("/topic/online-count", 1).await;

    let mut other = t.connect(2).await;
    let msg = next_frame(&mut watcher).await.unwrap();
    assert_eq!(body(&msg), json!({"count": 2}));

    send(&mut other, &Frame::new(Command::Disconnect)).await;
    let msg = next_frame(&mut watcher).await.unwrap();
    assert_eq!(body(&msg), json!({"count": 1}));
}

#[tokio::test]
async fn disconnect_with_receipt() {
    let t = TestServer::default().await;
    let mut ws = t.connect(1).await;
    send(&mut ws, &subscribe_frame("s", "/topic/dict")).await;
    t.wait_for_subscribers("/topic/dict", 1).await;

    send(&mut ws, &Frame::new(Command::Disconnect).with_header("receipt", "bye-1")).await;
    let receipt = next_frame(&mut ws).await.unwrap();
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(receipt.header("receipt-id"), Some("bye-1"));
    assert_eq!(close_code(&mut ws).await, Some(CLOSE_NORMAL));

    t.wait_for("unregister", |s| s.broker().connection_count() == 0).await;
    assert_eq!(t.server.broker().subscriber_count("/topic/dict"), 0);
    assert_eq!(t.server.broker().online_user_count(), 0);
}

#[tokio::test]
async fn client_drop_unregisters_connection() {
    let t = TestServer::default().await;
    let mut ws = t.connect(3).await;
    send(&mut ws, &subscribe_frame("s", "/topic/dict")).await;
    t.wait_for_subscribers("/topic/dict", 1).await;
    drop(ws);

    t.wait_for("unregister", |s| s.broker().connection_count() == 0).await;
    assert_eq!(t.server.broker().subscriber_count("/topic/dict"), 0);
}

#[tokio::test]
async fn server_heartbeats_at_requested_period() {
    let config = ServerConfig {
        heartbeat_floor: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let mut ws = t.open().await;
    let token = t.token(1).await;
    send(&mut ws, &connect_frame(&token).with_header("heart-beat", "0,100")).await;
    let connected = next_frame(&mut ws).await.unwrap();
    assert_eq!(connected.header("heart-beat"), Some("100,0"));

    assert_eq!(next_text(&mut ws).await.as_deref(), Some("\n"));
    assert_eq!(next_text(&mut ws).await.as_deref(), Some("\n"));
}

#[tokio::test]
async fn silent_client_is_dropped_after_grace_period() {
    let config = ServerConfig {
        heartbeat_grace_factor: 2,
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let mut ws = t.open().await;
    let token = t.token(1).await;
    send(&mut ws, &connect_frame(&token).with_header("heart-beat", "100,0")).await;
    assert_eq!(next_frame(&mut ws).await.unwrap().command, Command::Connected);

    assert_eq!(close_code(&mut ws).await, Some(CLOSE_NORMAL));
    t.wait_for("unregister", |s| s.broker().connection_count() == 0).await;
}

#[tokio::test]
async fn socket_without_connect_is_closed_at_deadline() {
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let mut ws = t.open().await;

    let error = next_frame(&mut ws).await.unwrap();
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.header("message"), Some("Handshake timed out"));
    assert_eq!(close_code(&mut ws).await, Some(CLOSE_POLICY));
    t.wait_for("unregister", |s| s.broker().connection_count() == 0).await;
}

#[tokio::test]
async fn authenticated_socket_outlives_handshake_deadline() {
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let mut ws = t.connect(1).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_silent(&mut ws).await;
    assert_eq!(t.server.broker().connection_count(), 1);
}

#[tokio::test]
async fn oversized_frame_closes_with_too_big() {
    let config = ServerConfig {
        max_frame_bytes: 64,
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let mut ws = t.open().await;
    send_text(&mut ws, &"X".repeat(100)).await;

    let error = next_frame(&mut ws).await.unwrap();
    assert_eq!(error.command, Command::Error);
    assert_eq!(close_code(&mut ws).await, Some(CLOSE_TOO_BIG));
}

#[tokio::test]
async fn upgrades_beyond_limit_are_refused() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let t = TestServer::boot(config).await;
    let _first = t.open().await;
    t.wait_for("first connection", |s| s.broker().connection_count() == 1).await;

    match connect_async(t.url.as_str()).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status().as_u16(), 503),
        Err(e) => panic!("expected HTTP 503, got {e}"),
        Ok(_) => panic!("upgrade beyond the limit succeeded"),
    }
}

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let t = TestServer::default().await;
    let mut ws = t.connect(1).await;

    let shutdown = t.server.shutdown().clone();
    let drained = tokio::spawn(async move { shutdown.graceful_shutdown(Some(TIMEOUT)).await });

    assert_eq!(close_code(&mut ws).await, Some(CLOSE_GOING_AWAY));
    assert!(drained.await.unwrap());
    assert_eq!(t.server.broker().connection_count(), 0);
}
