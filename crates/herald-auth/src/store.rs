//! Shared state behind token revocation.
//!
//! The store holds two kinds of keys, named the way a shared cache would
//! name them:
//!
//! - `auth:token:version:{userId}`: the user's version counter, no expiry
//! - `auth:token:blacklist:{jti}`: a revoked token id, expiring with the token

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use herald_core::{TokenId, UserId};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::StoreError;

/// Key of a user's version counter.
pub fn version_key(user_id: UserId) -> String {
    format!("auth:token:version:{user_id}")
}

/// Key of a blacklisted token id.
pub fn blacklist_key(token_id: &TokenId) -> String {
    format!("auth:token:blacklist:{token_id}")
}

/// Backing store for version counters and the blacklist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current version counter for a user (0 if never bumped).
    async fn get_version(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Atomically increment a user's counter and return the new value.
    async fn increment_version(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Blacklist a token id, optionally for a limited time.
    async fn blacklist(&self, token_id: &TokenId, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Whether a token id is currently blacklisted.
    async fn is_blacklisted(&self, token_id: &TokenId) -> Result<bool, StoreError>;
}

#[derive(Debug)]
struct Entry {
    value: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`TokenStore`] with per-entry TTL.
///
/// Expired entries are ignored on read and dropped by [`purge_expired`].
///
/// [`purge_expired`]: MemoryTokenStore::purge_expired
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, Entry>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live and not-yet-purged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn live_value(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let expired = {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value);
            }
            true
        };
        if expired {
            let _ = self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_version(&self, user_id: UserId) -> Result<u64, StoreError> {
        Ok(self.live_value(&version_key(user_id)).unwrap_or(0))
    }

    async fn increment_version(&self, user_id: UserId) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(version_key(user_id)).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: 0,
                expires_at: None,
            };
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn blacklist(&self, token_id: &TokenId, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = Entry {
            value: 1,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let _ = self.entries.insert(blacklist_key(token_id), entry);
        Ok(())
    }

    async fn is_blacklisted(&self, token_id: &TokenId) -> Result<bool, StoreError> {
        Ok(self.live_value(&blacklist_key(token_id)).is_some())
    }
}

/// Periodically purge expired entries until `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<MemoryTokenStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.purge_expired();
                    if removed > 0 {
                        debug!(removed, remaining = store.len(), "purged expired token store entries");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
