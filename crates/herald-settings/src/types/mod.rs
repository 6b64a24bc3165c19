//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` on the wire. Each
//! type implements [`Default`] with production values, and every section
//! is `#[serde(default)]` so partial JSON fills in the rest.

mod auth;
mod server;

pub use auth::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000, "wsPath": "/stomp" },
///   "auth": { "secret": "change-me", "refreshTokenTtlSecs": null },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Token signing and lifetimes.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject values the relay cannot run with.
    ///
    /// Port 0 is allowed and means "pick a free port".
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));
        if !self.server.ws_path.starts_with('/') {
            return invalid("server.wsPath must start with '/'");
        }
        if self.server.max_connections == 0 {
            return invalid("server.maxConnections must be at least 1");
        }
        if self.server.outbound_buffer_size == 0 {
            return invalid("server.outboundBufferSize must be at least 1");
        }
        if self.server.max_frame_bytes == 0 {
            return invalid("server.maxFrameBytes must be at least 1");
        }
        if self.server.heartbeat_grace_factor == 0 {
            return invalid("server.heartbeatGraceFactor must be at least 1");
        }
        if self.server.handshake_timeout_secs == 0 {
            return invalid("server.handshakeTimeoutSecs must be at least 1");
        }
        if self.auth.access_token_ttl_secs == 0 {
            return invalid("auth.accessTokenTtlSecs must be at least 1");
        }
        if self.auth.refresh_token_ttl_secs == Some(0) {
            return invalid("auth.refreshTokenTtlSecs must be at least 1 or null");
        }
        if self.auth.secret.as_deref().is_some_and(str::is_empty) {
            return invalid("auth.secret must not be empty");
        }
        Ok(())
    }
}
