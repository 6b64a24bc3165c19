//! STOMP heart-beat negotiation and the server-side emitter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;

/// Heart-beat periods agreed during the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often the server sends a heartbeat, if at all.
    pub send: Option<Duration>,
    /// How often the client promised to send something, if at all.
    pub expect: Option<Duration>,
}

impl Heartbeat {
    /// Negotiate from a CONNECT `heart-beat` header (`cx,cy` in ms).
    ///
    /// A positive `cy` starts the emitter at that period, raised to
    /// `floor`. A malformed header disables heartbeats in both directions.
    pub fn negotiate(header: Option<&str>, floor: Duration) -> Self {
        let Some((cx, cy)) = header.and_then(parse_pair) else {
            return Self::default();
        };
        let positive = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Self {
            send: positive(cy).map(|period| period.max(floor)),
            expect: positive(cx),
        }
    }

    /// Value of the CONNECTED `heart-beat` header.
    pub fn header_value(&self) -> (u64, u64) {
        let ms = |d: Option<Duration>| d.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        (ms(self.send), ms(self.expect))
    }

    /// How long the read loop may stay silent before the client is
    /// considered gone.
    pub fn idle_timeout(&self, grace_factor: u32) -> Option<Duration> {
        self.expect.map(|period| period * grace_factor)
    }
}

fn parse_pair(value: &str) -> Option<(u64, u64)> {
    let (cx, cy) = value.split_once(',')?;
    Some((cx.trim().parse().ok()?, cy.trim().parse().ok()?))
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The connection stopped accepting frames.
    Closed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Send a heartbeat every `period` until cancelled or the connection closes.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    period: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(period);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !connection.is_open() {
                    return HeartbeatResult::Closed;
                }
                let _ = connection.send_heartbeat();
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
