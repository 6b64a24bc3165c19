//! STOMP over WebSocket: connections, the broker, frame dispatch,
//! heartbeats and the per-client session loop.

pub mod broker;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
