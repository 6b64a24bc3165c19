//! Token claim set and related value types.

use herald_core::{TokenId, UserId};
use serde::{Deserialize, Serialize};

/// Which of the two token kinds a token is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Short-lived token used to authenticate API calls and handshakes.
    Access,
    /// Long-lived token used only to mint new access tokens.
    Refresh,
}

/// Identity a token is issued for.
///
/// Built by the caller from its user directory at login time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSubject {
    /// User id.
    pub user_id: UserId,
    /// Department the user belongs to.
    pub dept_id: Option<i64>,
    /// Numeric data-scope level.
    pub data_scope: i32,
    /// Login name.
    pub username: String,
    /// Granted authority strings (roles and permissions).
    pub authorities: Vec<String>,
}

/// Claims embedded in every token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// User id.
    pub user_id: UserId,
    /// Department id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dept_id: Option<i64>,
    /// Data-scope level.
    #[serde(default)]
    pub data_scope: i32,
    /// Login name.
    pub username: String,
    /// Granted authorities.
    #[serde(default)]
    pub authorities: Vec<String>,
    /// User version counter at issuance.
    #[serde(default)]
    pub token_version: u64,
    /// Unique token id.
    pub jti: TokenId,
    /// Issuer.
    pub iss: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch. Absent for non-expiring tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Set on refresh tokens.
    #[serde(default)]
    pub refresh: bool,
}

impl TokenClaims {
    /// The kind recorded in the claims.
    pub fn kind(&self) -> TokenKind {
        if self.refresh {
            TokenKind::Refresh
        } else {
            TokenKind::Access
        }
    }
}

impl From<&TokenClaims> for TokenSubject {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            user_id: claims.user_id,
            dept_id: claims.dept_id,
            data_scope: claims.data_scope,
            username: claims.username.clone(),
            authorities: claims.authorities.clone(),
        }
    }
}

/// Result of issuing or refreshing tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Always `"Bearer"`.
    pub token_type: String,
    /// The access token.
    pub access_token: String,
    /// The refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Extract the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively. Returns `None` for any other
/// scheme or an empty token.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
