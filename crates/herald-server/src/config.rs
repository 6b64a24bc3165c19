//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the herald server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Depth of each connection's outbound queue.
    pub outbound_buffer_size: usize,
    /// Largest inbound frame in bytes.
    pub max_frame_bytes: usize,
    /// Shortest server heartbeat period honoured.
    pub heartbeat_floor: Duration,
    /// Inbound idle tolerance as a multiple of the client heartbeat period.
    pub heartbeat_grace_factor: u32,
    /// How long a socket may stay open without a successful CONNECT.
    pub handshake_timeout: Duration,
    /// How long teardown waits for queued frames to flush.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            max_connections: 1_000,
            outbound_buffer_size: 256,
            max_frame_bytes: 64 * 1024,
            heartbeat_floor: Duration::from_secs(1),
            heartbeat_grace_factor: 3,
            handshake_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(2),
        }
    }
}
