//! Issue, validate, refresh and revoke tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use herald_core::{TokenId, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info, warn};

use crate::claims::{TokenClaims, TokenKind, TokenPair, TokenSubject, bearer_token};
use crate::errors::TokenError;
use crate::store::TokenStore;

/// Default access token lifetime (2 hours).
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(2 * 3600);
/// Default refresh token lifetime (7 days).
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Default issuer claim.
pub const DEFAULT_ISSUER: &str = "herald";

/// Signing and lifetime parameters.
#[derive(Clone)]
pub struct TokenConfig {
    /// HMAC-SHA256 signing secret.
    pub secret: Vec<u8>,
    /// Value of the `iss` claim, also required on validation.
    pub issuer: String,
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime; `None` issues refresh tokens without expiry.
    pub refresh_ttl: Option<Duration>,
    /// Clock skew tolerated when checking expiry.
    pub leeway: Duration,
}

impl TokenConfig {
    /// Config with default lifetimes for the given secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: Some(DEFAULT_REFRESH_TTL),
            leeway: Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[redacted]")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("leeway", &self.leeway)
            .finish()
    }
}

/// Token lifecycle manager.
///
/// Cheap to share behind an `Arc`; all state lives in the [`TokenStore`].
pub struct TokenManager {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    store: Arc<dyn TokenStore>,
}

impl TokenManager {
    /// Create a manager signing with `config.secret` and backed by `store`.
    pub fn new(config: TokenConfig, store: Arc<dyn TokenStore>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Refresh tokens may be issued without `exp`.
        validation.required_spec_claims.clear();
        validation.leeway = config.leeway.as_secs();
        validation.set_issuer(&[config.issuer.as_str()]);

        Self {
            encoding: EncodingKey::from_secret(&config.secret),
            decoding: DecodingKey::from_secret(&config.secret),
            validation,
            config,
            store,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint an access and a refresh token for `subject`.
    ///
    /// Both embed the user's current version counter.
    pub async fn issue(&self, subject: &TokenSubject) -> Result<TokenPair, TokenError> {
        let version = self.store.get_version(subject.user_id).await?;
        let access_token = self.mint(subject, version, TokenKind::Access)?;
        let refresh_token = self.mint(subject, version, TokenKind::Refresh)?;
        info!(user_id = subject.user_id, version, "issued token pair");
        Ok(self.pair(access_token, refresh_token))
    }

    /// Mint a new access token from a valid refresh token.
    ///
    /// The refresh token itself is returned unchanged in the pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self
            .validate(refresh_token, TokenKind::Refresh)
            .await
            .ok_or(TokenError::InvalidRefreshToken)?;
        let subject = TokenSubject::from(&claims);
        let version = self.store.get_version(subject.user_id).await?;
        let access_token = self.mint(&subject, version, TokenKind::Access)?;
        debug!(user_id = subject.user_id, "refreshed access token");
        Ok(self.pair(access_token, refresh_token.to_string()))
    }

    /// Whether `token` is a currently valid access token.
    pub async fn validate_access(&self, token: &str) -> bool {
        self.validate(token, TokenKind::Access).await.is_some()
    }

    /// Claims of `token` if it is a currently valid access token.
    pub async fn try_get_payload(&self, token: &str) -> Option<TokenClaims> {
        self.validate(token, TokenKind::Access).await
    }

    /// Blacklist the token carried in an `Authorization` header value.
    ///
    /// The signature is not checked: logging out with a token that would
    /// fail validation anyway is harmless. The blacklist entry lives as
    /// long as the token would still pass validation, leeway included.
    /// Absent or malformed headers, and tokens past expiry plus leeway,
    /// are ignored.
    pub async fn invalidate(&self, authorization: Option<&str>) -> Result<(), TokenError> {
        let Some(token) = authorization.and_then(bearer_token) else {
            return Ok(());
        };
        let Some(claims) = self.decode_unverified(token) else {
            debug!("ignoring logout with undecodable token");
            return Ok(());
        };

        let ttl = match claims.exp {
            Some(exp) => {
                let leeway = i64::try_from(self.config.leeway.as_secs()).unwrap_or(i64::MAX);
                let remaining = exp.saturating_add(leeway) - Utc::now().timestamp();
                if remaining <= 0 {
                    return Ok(());
                }
                Some(Duration::from_secs(remaining.unsigned_abs()))
            }
            None => None,
        };
        self.store.blacklist(&claims.jti, ttl).await?;
        info!(user_id = claims.user_id, jti = %claims.jti, "token blacklisted");
        Ok(())
    }

    /// Invalidate every token previously issued to `user_id`.
    ///
    /// Returns the user's new version counter.
    pub async fn invalidate_all_sessions(&self, user_id: UserId) -> Result<u64, TokenError> {
        let version = self.store.increment_version(user_id).await?;
        info!(user_id, version, "all sessions invalidated");
        Ok(version)
    }

    fn pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            token_type: "Bearer".to_string(),
            access_token,
            refresh_token,
            expires_in: self.config.access_ttl.as_secs(),
        }
    }

    fn mint(&self, subject: &TokenSubject, version: u64, kind: TokenKind) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => Some(self.config.access_ttl),
            TokenKind::Refresh => self.config.refresh_ttl,
        };
        let claims = TokenClaims {
            user_id: subject.user_id,
            dept_id: subject.dept_id,
            data_scope: subject.data_scope,
            username: subject.username.clone(),
            authorities: subject.authorities.clone(),
            token_version: version,
            jti: TokenId::new(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: ttl.map(|ttl| now.saturating_add_unsigned(ttl.as_secs())),
            refresh: kind == TokenKind::Refresh,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Ordered validation: signature and expiry, kind, version, blacklist.
    async fn validate(&self, token: &str, kind: TokenKind) -> Option<TokenClaims> {
        let claims = match decode::<TokenClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(err) => {
                debug!(error = %err, "token rejected");
                return None;
            }
        };

        if claims.kind() != kind {
            debug!(user_id = claims.user_id, expected = ?kind, "token kind mismatch");
            return None;
        }

        let current = match self.store.get_version(claims.user_id).await {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "version lookup failed, rejecting token");
                return None;
            }
        };
        if claims.token_version < current {
            debug!(user_id = claims.user_id, token_version = claims.token_version, current, "stale token version");
            return None;
        }

        match self.store.is_blacklisted(&claims.jti).await {
            Ok(false) => Some(claims),
            Ok(true) => {
                debug!(user_id = claims.user_id, jti = %claims.jti, "token is blacklisted");
                None
            }
            Err(err) => {
                warn!(error = %err, "blacklist lookup failed, rejecting token");
                None
            }
        }
    }

    fn decode_unverified(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }
}
