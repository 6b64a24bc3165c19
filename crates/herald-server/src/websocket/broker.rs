//! Process-wide subscription registry and message fan-out.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use herald_core::{ConnectionId, UserId};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use super::connection::Connection;
use crate::metrics::STOMP_MESSAGES_DELIVERED_TOTAL;

/// Prefix of per-user destinations.
pub const USER_PREFIX: &str = "/user";

type ConnectionSet = HashMap<ConnectionId, Arc<Connection>>;

/// Rewrite `destination` into the per-user namespace unless it already is.
///
/// `/queue/message` and `queue/message` both become `/user/queue/message`.
pub fn user_destination(destination: &str) -> String {
    if destination == USER_PREFIX || destination.starts_with("/user/") {
        return destination.to_string();
    }
    if destination.starts_with('/') {
        format!("{USER_PREFIX}{destination}")
    } else {
        format!("{USER_PREFIX}/{destination}")
    }
}

/// Registry of live connections indexed by destination and by user.
///
/// Each mutation touches one map entry at a time. Deliveries work on a
/// snapshot of the subscriber set, so a subscription that changes while a
/// broadcast is in flight may or may not receive it.
#[derive(Default)]
pub struct Broker {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    destinations: DashMap<String, ConnectionSet>,
    users: DashMap<UserId, ConnectionSet>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection, indexing it under its user when authenticated.
    ///
    /// Calling again after authentication re-indexes the same instance.
    pub fn register_connection(&self, connection: &Arc<Connection>) {
        let _ = self
            .connections
            .insert(connection.id().clone(), connection.clone());
        if let Some(user_id) = connection.user_id() {
            let _ = self
                .users
                .entry(user_id)
                .or_default()
                .insert(connection.id().clone(), connection.clone());
            debug!(conn_id = %connection.id(), user_id, "connection bound to user");
        }
    }

    /// Remove a connection from every registry, pruning emptied entries.
    ///
    /// Returns `false` if it was not registered. Safe to call repeatedly.
    pub fn unregister_connection(&self, connection: &Connection) -> bool {
        let id = connection.id();
        for destination in connection.clear_subscriptions() {
            remove_member(&self.destinations, &destination, id);
        }
        if let Some(user_id) = connection.user_id() {
            remove_member(&self.users, &user_id, id);
        }
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(conn_id = %id, "connection unregistered");
        }
        removed
    }

    /// Subscribe `connection` to `destination` under `subscription_id`.
    pub fn subscribe(&self, connection: &Arc<Connection>, subscription_id: &str, destination: &str) {
        let change = connection.subscribe(subscription_id, destination);
        if let Some(vacated) = change.vacated {
            remove_member(&self.destinations, &vacated, connection.id());
        }
        let _ = self
            .destinations
            .entry(destination.to_string())
            .or_default()
            .insert(connection.id().clone(), connection.clone());
        debug!(
            conn_id = %connection.id(),
            subscription_id,
            destination,
            replaced = change.replaced.as_deref(),
            "subscribed"
        );
    }

    /// Drop one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, connection: &Connection, subscription_id: &str) -> bool {
        let Some(destination) = connection.unsubscribe(subscription_id) else {
            debug!(conn_id = %connection.id(), subscription_id, "unsubscribe for unknown id");
            return false;
        };
        remove_member(&self.destinations, &destination, connection.id());
        debug!(conn_id = %connection.id(), subscription_id, destination, "unsubscribed");
        true
    }

    /// Deliver `payload` as JSON to every subscriber of `destination`.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn broadcast<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> usize {
        let Some(body) = to_json(destination, payload) else {
            return 0;
        };
        let subscribers = snapshot(&self.destinations, destination);
        let delivered = deliver(&subscribers, destination, &body);
        debug!(destination, recipients = subscribers.len(), delivered, "broadcast");
        delivered
    }

    /// Deliver `payload` to `user_id`'s connections subscribed to the
    /// per-user form of `destination`.
    pub fn send_to_user<T: Serialize + ?Sized>(
        &self,
        user_id: UserId,
        destination: &str,
        payload: &T,
    ) -> usize {
        let destination = user_destination(destination);
        let Some(body) = to_json(&destination, payload) else {
            return 0;
        };
        let connections = snapshot(&self.users, &user_id);
        let delivered = deliver(&connections, &destination, &body);
        debug!(user_id, destination, delivered, "sent to user");
        delivered
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of distinct authenticated users.
    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of connections subscribed to `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.destinations.get(destination).map_or(0, |set| set.len())
    }

    /// Every registered connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }
}

fn to_json<T: Serialize + ?Sized>(destination: &str, payload: &T) -> Option<String> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(destination, error = %e, "failed to serialize payload");
            None
        }
    }
}

fn snapshot<K: Eq + Hash + ?Sized, Q: Eq + Hash + std::borrow::Borrow<K>>(
    map: &DashMap<Q, ConnectionSet>,
    key: &K,
) -> Vec<Arc<Connection>> {
    map.get(key)
        .map(|set| set.values().cloned().collect())
        .unwrap_or_default()
}

fn deliver(connections: &[Arc<Connection>], destination: &str, body: &str) -> usize {
    let mut delivered = 0;
    for conn in connections {
        if conn.send_message(destination, body) {
            delivered += 1;
        } else if conn.is_open() && conn.subscription_for(destination).is_some() {
            warn!(conn_id = %conn.id(), destination, "failed to queue message for client");
        }
    }
    counter!(STOMP_MESSAGES_DELIVERED_TOTAL).increment(delivered as u64);
    delivered
}

fn remove_member<K: Eq + Hash + ?Sized, Q: Eq + Hash + std::borrow::Borrow<K>>(
    map: &DashMap<Q, ConnectionSet>,
    key: &K,
    id: &ConnectionId,
) {
    let now_empty = match map.get_mut(key) {
        Some(mut set) => {
            let _ = set.remove(id);
            set.is_empty()
        }
        None => false,
    };
    if now_empty {
        let _ = map.remove_if(key, |_, set| set.is_empty());
    }
}
