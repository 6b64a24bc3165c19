//! Server and logging settings.

use herald_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Listener, admission and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 = auto-assign).
    pub port: u16,
    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Depth of each connection's outbound frame queue.
    pub outbound_buffer_size: usize,
    /// Largest inbound frame, in bytes, the accumulator will hold.
    pub max_frame_bytes: usize,
    /// Shortest server heartbeat period honoured, in milliseconds.
    pub heartbeat_floor_ms: u64,
    /// Inbound idle tolerance as a multiple of the client heartbeat period.
    pub heartbeat_grace_factor: u32,
    /// Seconds a new socket may stay unauthenticated before it is closed.
    pub handshake_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            max_connections: 10_000,
            outbound_buffer_size: 256,
            max_frame_bytes: 64 * 1024,
            heartbeat_floor_ms: 1_000,
            heartbeat_grace_factor: 3,
            handshake_timeout_secs: 10,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Line layout.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
