//! Token error types.

/// Failure of the backing token store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or answered with an error.
    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by token operations that can fail.
///
/// Validation never produces one of these: a token that does not verify
/// is simply reported as invalid.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signing a new token failed.
    #[error("failed to sign token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),

    /// The presented refresh token did not validate.
    #[error("invalid refresh token")]
    InvalidRefreshToken,

    /// The token store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
