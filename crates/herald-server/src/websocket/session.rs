//! WebSocket session lifecycle: one connected client from upgrade through
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use herald_core::ConnectionId;
use herald_stomp::{Frame, FrameBuffer, FrameError, Inbound};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, trace};

use super::connection::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY, CLOSE_TOO_BIG, Connection, Outbound};
use super::handler::{Flow, SessionContext, SessionState, handle_frame};
use crate::metrics::{
    STOMP_CONNECTION_DURATION_SECONDS, STOMP_CONNECTIONS_ACTIVE, STOMP_CONNECTIONS_TOTAL,
    STOMP_DISCONNECTIONS_TOTAL, STOMP_FRAMES_RECEIVED_TOTAL,
};

/// Why a session's read loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum End {
    /// The server decided to close (DISCONNECT, failed auth, protocol violation).
    Closed {
        /// WebSocket close code sent to the client.
        code: u16,
        /// Close reason sent to the client.
        reason: &'static str,
    },
    /// The client closed the socket or the stream ended.
    ClientClosed,
    /// Reading from the socket failed.
    TransportError,
    /// The client stopped sending heartbeats.
    IdleTimeout,
    /// The client never completed CONNECT.
    HandshakeTimeout,
    /// The server is shutting down.
    Shutdown,
}

impl End {
    fn close_args(&self) -> (u16, &'static str) {
        match self {
            Self::Closed { code, reason } => (*code, reason),
            Self::Shutdown => (CLOSE_GOING_AWAY, "server shutting down"),
            Self::IdleTimeout => (CLOSE_NORMAL, "heartbeat timeout"),
            Self::HandshakeTimeout => (CLOSE_POLICY, "handshake timeout"),
            Self::ClientClosed | Self::TransportError => (CLOSE_NORMAL, ""),
        }
    }
}

/// Run a STOMP session over an upgraded socket.
///
/// Registers an anonymous [`Connection`], processes frames until the
/// session ends, then tears everything down. Teardown always runs,
/// whichever way the loop exited.
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    ctx: SessionContext,
    shutdown: CancellationToken,
) -> End {
    let (ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::channel(ctx.config.outbound_buffer_size.max(1));
    let connection = Arc::new(Connection::new(conn_id, tx));
    let writer = tokio::spawn(write_loop(ws_tx, rx).in_current_span());

    ctx.broker.register_connection(&connection);
    counter!(STOMP_CONNECTIONS_TOTAL).increment(1);
    gauge!(STOMP_CONNECTIONS_ACTIVE).increment(1.0);
    info!("client connected");

    let session_cancel = shutdown.child_token();
    let mut state = SessionState::new(connection, session_cancel.clone());
    let end = read_loop(&mut ws_rx, &mut state, &ctx, &shutdown).await;
    session_cancel.cancel();

    teardown(state, &ctx, &end, writer).await;
    end
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &mut SessionState,
    ctx: &SessionContext,
    shutdown: &CancellationToken,
) -> End {
    let mut buffer = FrameBuffer::new(ctx.config.max_frame_bytes);
    let handshake_deadline = time::Instant::now() + ctx.config.handshake_timeout;

    loop {
        let authenticated = state.connection().is_authenticated();
        let wait = if authenticated {
            state.idle_timeout()
        } else {
            Some(handshake_deadline.saturating_duration_since(time::Instant::now()))
        };
        let next = tokio::select! {
            () = shutdown.cancelled() => return End::Shutdown,
            next = next_message(ws_rx, wait) => next,
        };
        let message = match next {
            Err(_) if !authenticated => {
                info!(timeout = ?ctx.config.handshake_timeout, "no CONNECT before deadline");
                let _ = state.connection().send_error("Handshake timed out");
                return End::HandshakeTimeout;
            }
            Err(_) => {
                info!(timeout = ?state.idle_timeout(), "client heartbeat timed out");
                return End::IdleTimeout;
            }
            Ok(None) => return End::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "socket read failed");
                return End::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => buffer.push(text.as_str().as_bytes()),
            Message::Binary(data) => buffer.push(&data),
            Message::Close(frame) => {
                debug!(?frame, "client sent close frame");
                return End::ClientClosed;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        }

        if let Some(end) = drain_frames(&mut buffer, state, ctx).await {
            return end;
        }
    }
}

/// Dispatch every complete frame in `buffer`, in order.
async fn drain_frames(buffer: &mut FrameBuffer, state: &mut SessionState, ctx: &SessionContext) -> Option<End> {
    while let Some(item) = buffer.next_frame() {
        let text = match item {
            Ok(Inbound::Heartbeat) => {
                trace!("client heartbeat");
                continue;
            }
            Ok(Inbound::Frame(text)) => text,
            Err(FrameError::InvalidUtf8) => {
                let _ = state.connection().send_error("Frame is not valid UTF-8");
                continue;
            }
            Err(e @ FrameError::TooLarge { .. }) => {
                let _ = state.connection().send_error(&e.to_string());
                return Some(End::Closed {
                    code: CLOSE_TOO_BIG,
                    reason: "frame too large",
                });
            }
        };

        let Some(frame) = Frame::parse(&text) else {
            debug!(len = text.len(), "unparsable frame");
            let _ = state.connection().send_error("Malformed frame");
            continue;
        };
        counter!(STOMP_FRAMES_RECEIVED_TOTAL, "command" => frame.command.as_str().to_owned()).increment(1);

        if let Flow::Close { code, reason } = handle_frame(&frame, state, ctx).await {
            return Some(End::Closed { code, reason });
        }
    }
    None
}

async fn next_message(
    ws_rx: &mut SplitStream<WebSocket>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, axum::Error>>, time::error::Elapsed> {
    match idle_timeout {
        Some(limit) => time::timeout(limit, ws_rx.next()).await,
        None => Ok(ws_rx.next().await),
    }
}

/// Sole writer of the socket: drains the connection's queue until a close
/// is requested or every sender is gone.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "socket write failed");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "failed to send close frame");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn teardown(mut state: SessionState, ctx: &SessionContext, end: &End, mut writer: JoinHandle<()>) {
    let connection = state.connection().clone();
    let _ = state.stop_heartbeat();
    let _ = ctx.broker.unregister_connection(&connection);
    if connection.is_authenticated() {
        let _ = ctx.publisher.online_count_changed();
    }

    let (code, reason) = end.close_args();
    let _ = connection.close(code, reason);
    drop(state);

    if time::timeout(ctx.config.drain_timeout, &mut writer).await.is_err() {
        debug!("writer did not drain in time, aborting");
        writer.abort();
    }

    let age = connection.age();
    counter!(STOMP_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(STOMP_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(STOMP_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
    info!(
        ?end,
        user_id = connection.user_id(),
        duration_secs = age.as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_closes_with_going_away() {
        assert_eq!(End::Shutdown.close_args(), (CLOSE_GOING_AWAY, "server shutting down"));
    }

    #[test]
    fn server_close_keeps_its_code() {
        let end = End::Closed {
            code: CLOSE_TOO_BIG,
            reason: "frame too large",
        };
        assert_eq!(end.close_args(), (CLOSE_TOO_BIG, "frame too large"));
    }

    #[test]
    fn client_side_endings_close_normally() {
        assert_eq!(End::ClientClosed.close_args().0, CLOSE_NORMAL);
        assert_eq!(End::TransportError.close_args().0, CLOSE_NORMAL);
        assert_eq!(End::IdleTimeout.close_args(), (CLOSE_NORMAL, "heartbeat timeout"));
    }

    #[test]
    fn handshake_timeout_is_a_policy_close() {
        assert_eq!(End::HandshakeTimeout.close_args(), (CLOSE_POLICY, "handshake timeout"));
    }
}
