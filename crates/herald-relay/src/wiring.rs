//! Translate loaded settings into the runtime configs of each crate.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use herald_auth::TokenConfig;
use herald_server::ServerConfig;
use herald_settings::{AuthSettings, ServerSettings};
use rand::RngCore;
use tracing::warn;

/// Bytes of entropy in a generated secret.
const SECRET_BYTES: usize = 32;

/// A fresh random signing secret, base64url encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Server limits from the `server` settings section.
pub fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        ws_path: settings.ws_path.clone(),
        max_connections: settings.max_connections,
        outbound_buffer_size: settings.outbound_buffer_size,
        max_frame_bytes: settings.max_frame_bytes,
        heartbeat_floor: Duration::from_millis(settings.heartbeat_floor_ms),
        heartbeat_grace_factor: settings.heartbeat_grace_factor,
        handshake_timeout: Duration::from_secs(settings.handshake_timeout_secs),
        ..ServerConfig::default()
    }
}

/// Token parameters from the `auth` settings section.
///
/// Without a configured secret a random one is used, so tokens stop
/// validating when the process restarts.
pub fn token_config(settings: &AuthSettings) -> TokenConfig {
    let secret = if let Some(secret) = &settings.secret {
        secret.clone().into_bytes()
    } else {
        warn!("auth.secret not set; using a random secret, issued tokens will not survive a restart");
        generate_secret().into_bytes()
    };
    TokenConfig {
        secret,
        issuer: settings.issuer.clone(),
        access_ttl: Duration::from_secs(settings.access_token_ttl_secs),
        refresh_ttl: settings.refresh_token_ttl_secs.map(Duration::from_secs),
        leeway: Duration::from_secs(settings.leeway_secs),
    }
}
