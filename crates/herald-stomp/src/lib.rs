//! # herald-stomp
//!
//! Stateless codec for the subset of STOMP spoken by the relay.
//!
//! A frame on the wire is `COMMAND\nkey:value\n...\n\n[body]\0`. This crate
//! provides:
//!
//! - [`Frame`], [`Command`] and [`Headers`]: the structured form
//! - [`Frame::parse`] / [`Frame::encode`]: text to frame and back
//! - [`escape`] / [`unescape`]: header value escaping
//! - [`FrameBuffer`]: accumulates transport chunks and yields complete
//!   NUL-terminated frames plus bare heartbeat newlines
//!
//! The codec never interprets command semantics.

#![deny(unsafe_code)]

pub mod buffer;
pub mod errors;
pub mod escape;
pub mod frame;

pub use buffer::{FrameBuffer, Inbound};
pub use errors::FrameError;
pub use escape::{escape, unescape};
pub use frame::{Command, Frame, Headers};

/// Byte terminating every frame.
pub const NUL: u8 = 0;

/// A bare end-of-line sent as a heartbeat.
pub const HEARTBEAT: &str = "\n";
