//! Token settings.

use serde::{Deserialize, Serialize};

/// Token signing and lifetimes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC signing secret. When absent a random one is generated at
    /// startup and tokens do not survive a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Access token lifetime in seconds.
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds; `null` issues non-expiring
    /// refresh tokens.
    pub refresh_token_ttl_secs: Option<u64>,
    /// Clock skew tolerated on expiry checks, in seconds.
    pub leeway_secs: u64,
    /// Issuer claim written into and required on every token.
    pub issuer: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: None,
            access_token_ttl_secs: 7_200,
            refresh_token_ttl_secs: Some(604_800),
            leeway_secs: 0,
            issuer: "herald".to_string(),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .finish()
    }
}
