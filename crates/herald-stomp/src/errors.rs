//! Codec error types.

use thiserror::Error;

/// Errors raised while accumulating inbound frames.
///
/// Parsing itself never fails with an error: text that does not form a
/// frame yields `None` from [`Frame::parse`](crate::Frame::parse).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffered partial frame grew past the configured limit.
    #[error("frame exceeds {limit} bytes without a terminator")]
    TooLarge {
        /// The configured maximum.
        limit: usize,
    },

    /// A complete frame was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
