//! # herald-core
//!
//! Shared vocabulary for the herald crates:
//!
//! - **Branded IDs**: [`ConnectionId`], [`MessageId`] and [`TokenId`] as newtypes so a
//!   connection id is never passed where a token id is expected
//! - **User ids**: the numeric [`UserId`] carried in token claims
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` setup

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{ConnectionId, MessageId, TokenId, UserId};
