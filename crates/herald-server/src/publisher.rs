//! Push API for business services.
//!
//! Services that own dictionaries, notices and the like call these methods
//! to notify connected clients; they never touch connections directly.

use std::sync::Arc;

use herald_core::UserId;
use serde::Serialize;
use tracing::debug;

use crate::websocket::broker::Broker;

/// Topic announcing dictionary changes.
pub const TOPIC_DICT: &str = "/topic/dict";
/// Topic carrying notices addressed to everyone.
pub const TOPIC_NOTICE: &str = "/topic/notice";
/// Topic carrying the online user count.
pub const TOPIC_ONLINE_COUNT: &str = "/topic/online-count";
/// Per-user queue for targeted notices (resolved to `/user/queue/message`).
pub const QUEUE_MESSAGE: &str = "/queue/message";

/// Body of a dictionary-changed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictChanged<'a> {
    /// Code of the dictionary that changed.
    pub dict_code: &'a str,
}

/// Body of an online-count event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnlineCount {
    /// Distinct authenticated users.
    pub count: usize,
}

/// Who a notice is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeTargets {
    /// Every subscriber of [`TOPIC_NOTICE`].
    Everyone,
    /// Only these users, on their message queue.
    Users(Vec<UserId>),
}

/// Business-facing facade over the [`Broker`].
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<Broker>,
}

impl Publisher {
    /// Wrap a broker.
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Deliver `payload` to every subscriber of `topic`.
    pub fn broadcast<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> usize {
        self.broker.broadcast(topic, payload)
    }

    /// Deliver `payload` to one user's subscription on `queue`.
    pub fn send_to_user<T: Serialize + ?Sized>(&self, user_id: UserId, queue: &str, payload: &T) -> usize {
        self.broker.send_to_user(user_id, queue, payload)
    }

    /// Distinct authenticated users currently connected.
    pub fn online_count(&self) -> usize {
        self.broker.online_user_count()
    }

    /// Announce that a dictionary changed.
    pub fn dict_changed(&self, dict_code: &str) -> usize {
        self.broadcast(TOPIC_DICT, &DictChanged { dict_code })
    }

    /// Publish a notice to everyone or to a set of users.
    pub fn notice_published<T: Serialize + ?Sized>(&self, targets: &NoticeTargets, notice: &T) -> usize {
        match targets {
            NoticeTargets::Everyone => self.broadcast(TOPIC_NOTICE, notice),
            NoticeTargets::Users(users) => users
                .iter()
                .map(|&user_id| self.send_to_user(user_id, QUEUE_MESSAGE, notice))
                .sum(),
        }
    }

    /// Broadcast the current online user count.
    pub fn online_count_changed(&self) -> usize {
        let count = self.online_count();
        debug!(count, "online count changed");
        self.broadcast(TOPIC_ONLINE_COUNT, &OnlineCount { count })
    }
}
