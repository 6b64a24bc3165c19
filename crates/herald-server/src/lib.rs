//! # herald-server
//!
//! Authenticated STOMP-over-WebSocket pub/sub on axum.
//!
//! - [`websocket::broker::Broker`]: destination and user registries with
//!   broadcast and send-to-user fan-out
//! - [`websocket::session`]: per-connection read loop, handshake, heartbeats
//!   and teardown; each connection has a single writer task
//! - [`publisher::Publisher`]: push API for business services
//! - HTTP: the upgrade endpoint, `/health` and `/metrics`
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use publisher::{NoticeTargets, Publisher};
pub use server::HeraldServer;
pub use shutdown::ShutdownCoordinator;
