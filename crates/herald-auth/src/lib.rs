//! # herald-auth
//!
//! Session token lifecycle for the relay: issue, validate, refresh and
//! revoke signed access/refresh tokens.
//!
//! Revocation works at two granularities, both held in a shared
//! [`TokenStore`]:
//! - **Per user**: a monotonically increasing version counter. Every token
//!   embeds the counter value at issuance; bumping the counter
//!   invalidates all older tokens for that user at once.
//! - **Per token**: a blacklist of token ids whose entries expire with the
//!   token they revoke.
//!
//! [`MemoryTokenStore`] is the bundled in-process store.

#![deny(unsafe_code)]

pub mod claims;
pub mod errors;
pub mod manager;
pub mod store;

pub use claims::{TokenClaims, TokenKind, TokenPair, TokenSubject, bearer_token};
pub use errors::{StoreError, TokenError};
pub use manager::{TokenConfig, TokenManager};
pub use store::{MemoryTokenStore, TokenStore, spawn_sweeper};
