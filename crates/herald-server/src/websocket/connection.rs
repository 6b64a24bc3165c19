//! One live STOMP connection.
//!
//! Every outbound frame goes through a bounded queue drained by a single
//! writer task, so the read loop, the heartbeat emitter and broker
//! deliveries never interleave bytes on the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use herald_core::{ConnectionId, MessageId, UserId};
use herald_stomp::{Command, Frame, HEARTBEAT};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::metrics::STOMP_DELIVERY_DROPS_TOTAL;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code for a policy violation (failed authentication).
pub const CLOSE_POLICY: u16 = 1008;
/// WebSocket close code for a message too big to process.
pub const CLOSE_TOO_BIG: u16 = 1009;
/// WebSocket close code for a server going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Work item for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame or heartbeat.
    Frame(String),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Bidirectional subscription maps, one subscription per destination.
#[derive(Debug, Default)]
struct Subscriptions {
    by_id: HashMap<String, String>,
    by_destination: HashMap<String, String>,
}

/// Result of [`Connection::subscribe`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubscribeChange {
    /// Destination the connection no longer listens on, if the id was
    /// previously bound elsewhere.
    pub vacated: Option<String>,
    /// Subscription id displaced because the destination already had one.
    pub replaced: Option<String>,
}

/// Represents a connected STOMP client.
pub struct Connection {
    id: ConnectionId,
    user_id: Mutex<Option<UserId>>,
    subscriptions: Mutex<Subscriptions>,
    tx: mpsc::Sender<Outbound>,
    open: AtomicBool,
    connected_at: Instant,
    dropped: AtomicU64,
}

impl Connection {
    /// Create a connection whose writer drains `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            user_id: Mutex::new(None),
            subscriptions: Mutex::new(Subscriptions::default()),
            tx,
            open: AtomicBool::new(true),
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Authenticated user, if the handshake has succeeded.
    pub fn user_id(&self) -> Option<UserId> {
        *self.user_id.lock()
    }

    /// Whether the handshake has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.lock().is_some()
    }

    /// Attach the authenticated identity.
    pub fn authenticate(&self, user_id: UserId) {
        *self.user_id.lock() = Some(user_id);
    }

    /// Whether frames are still accepted for sending.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue one already-encoded payload.
    ///
    /// No-op returning `false` once the connection is closed. A full queue
    /// drops the payload and counts it.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(Outbound::Frame(text.into())).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(STOMP_DELIVERY_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Send a frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_raw(frame.encode())
    }

    /// Acknowledge a successful handshake.
    ///
    /// `heart_beat` is `(server emit period, expected client period)` in
    /// milliseconds.
    pub fn send_connected(&self, heart_beat: (u64, u64)) -> bool {
        let frame = Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        self.send_frame(&frame)
    }

    /// Report a problem to the client.
    pub fn send_error(&self, message: &str) -> bool {
        self.send_frame(&Frame::new(Command::Error).with_header("message", message))
    }

    /// Acknowledge a `receipt` header.
    pub fn send_receipt(&self, receipt_id: &str) -> bool {
        self.send_frame(&Frame::new(Command::Receipt).with_header("receipt-id", receipt_id))
    }

    /// Send a bare end-of-line.
    pub fn send_heartbeat(&self) -> bool {
        self.send_raw(HEARTBEAT)
    }

    /// Deliver a JSON body published on `destination`.
    ///
    /// Returns `false` without sending if the connection holds no
    /// subscription for `destination`.
    pub fn send_message(&self, destination: &str, body_json: &str) -> bool {
        let Some(subscription) = self.subscription_for(destination) else {
            return false;
        };
        let frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("subscription", subscription)
            .with_header("message-id", MessageId::new())
            .with_body(body_json);
        self.send_frame(&frame)
    }

    /// Stop accepting frames and ask the writer to close the socket.
    ///
    /// Only the first call has any effect.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Bind `id` to `destination` in the local maps.
    ///
    /// A destination holds one subscription per connection: subscribing to
    /// it again under a new id replaces the old id.
    pub fn subscribe(&self, id: &str, destination: &str) -> SubscribeChange {
        let mut subs = self.subscriptions.lock();
        let mut change = SubscribeChange::default();

        if let Some(previous) = subs.by_id.get(id) {
            if previous == destination {
                return change;
            }
            let previous = previous.clone();
            let _ = subs.by_id.remove(id);
            let _ = subs.by_destination.remove(&previous);
            change.vacated = Some(previous);
        }
        if let Some(old_id) = subs.by_destination.insert(destination.to_string(), id.to_string()) {
            let _ = subs.by_id.remove(&old_id);
            change.replaced = Some(old_id);
        }
        let _ = subs.by_id.insert(id.to_string(), destination.to_string());
        change
    }

    /// Drop subscription `id`, returning the destination it was bound to.
    pub fn unsubscribe(&self, id: &str) -> Option<String> {
        let mut subs = self.subscriptions.lock();
        let destination = subs.by_id.remove(id)?;
        let _ = subs.by_destination.remove(&destination);
        Some(destination)
    }

    /// Whether subscription `id` is active.
    pub fn has_subscription(&self, id: &str) -> bool {
        self.subscriptions.lock().by_id.contains_key(id)
    }

    /// Subscription id bound to `destination`.
    pub fn subscription_for(&self, destination: &str) -> Option<String> {
        self.subscriptions.lock().by_destination.get(destination).cloned()
    }

    /// Destinations this connection is subscribed to.
    pub fn destinations(&self) -> Vec<String> {
        self.subscriptions.lock().by_destination.keys().cloned().collect()
    }

    /// Drop every subscription, returning the destinations they covered.
    pub fn clear_subscriptions(&self) -> Vec<String> {
        let mut subs = self.subscriptions.lock();
        subs.by_id.clear();
        subs.by_destination.drain().map(|(destination, _)| destination).collect()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
