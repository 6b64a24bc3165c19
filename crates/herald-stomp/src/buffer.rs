//! Inbound frame accumulator.
//!
//! Transport reads do not line up with frames: one read may carry several
//! frames back to back, or end in the middle of one. [`FrameBuffer`] keeps
//! the raw bytes and hands out each frame only once its NUL terminator has
//! arrived. Splitting happens on bytes, so a multi-byte character cut by a
//! chunk boundary is reassembled before decoding.

use crate::NUL;
use crate::errors::FrameError;

/// One unit pulled from the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A bare end-of-line between frames.
    Heartbeat,
    /// The text of one frame, terminator removed.
    Frame(String),
}

/// Accumulates transport chunks and yields complete frames in order.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameBuffer {
    /// Create a buffer that rejects frames longer than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Append a transport chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently held (a partial frame, if any).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete unit.
    ///
    /// Returns `None` when only a partial frame (or nothing) remains. An
    /// oversized partial frame is an error and clears the buffer, since
    /// the stream can no longer be resynchronised.
    pub fn next_frame(&mut self) -> Option<Result<Inbound, FrameError>> {
        match self.buf.as_slice() {
            [b'\n', ..] => {
                let _ = self.buf.drain(..1);
                return Some(Ok(Inbound::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                let _ = self.buf.drain(..2);
                return Some(Ok(Inbound::Heartbeat));
            }
            _ => {}
        }

        let Some(end) = self.buf.iter().position(|&b| b == NUL) else {
            if self.buf.len() > self.max_frame_bytes {
                self.buf.clear();
                return Some(Err(FrameError::TooLarge {
                    limit: self.max_frame_bytes,
                }));
            }
            return None;
        };

        let mut raw: Vec<u8> = self.buf.drain(..=end).collect();
        let _ = raw.pop();
        if raw.len() > self.max_frame_bytes {
            return Some(Err(FrameError::TooLarge {
                limit: self.max_frame_bytes,
            }));
        }
        Some(
            String::from_utf8(raw)
                .map(Inbound::Frame)
                .map_err(|_| FrameError::InvalidUtf8),
        )
    }
}
