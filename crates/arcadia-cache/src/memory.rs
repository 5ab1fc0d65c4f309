//! In-process fallback store backed by a `DashMap`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::CacheStore;
use crate::task::{BackgroundTask, shutdown_requested};

/// Longest TTL honoured; larger values are clamped.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// A cached value with its absolute expiry.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub value: Value,
    pub expires_at: OffsetDateTime,
}

impl CachedEntry {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds until expiry, rounded up.
    pub fn remaining_ttl_secs(&self, now: OffsetDateTime) -> i64 {
        let left = (self.expires_at - now).whole_milliseconds();
        ((left + 999) / 1000) as i64
    }
}

/// Local map from key to `(value, expires_at)`.
///
/// Expired entries are dropped lazily on read and by a periodic sweep
/// ([`MemoryStore::spawn_sweeper`]). The sweep uses `DashMap::retain`, which
/// locks one shard at a time, so request handlers are never blocked for the
/// length of a full scan.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, CachedEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Live entries with their remaining TTL in seconds.
    pub fn live_entries(&self) -> Vec<(String, Value, i64)> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| {
                (
                    e.key().clone(),
                    e.value().value.clone(),
                    e.value().remaining_ttl_secs(now),
                )
            })
            .collect()
    }

    /// Start the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> BackgroundTask {
        let store = Arc::clone(self);
        BackgroundTask::spawn("fallback-sweeper", move |mut shutdown| async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(interval_secs = every.as_secs(), "Fallback sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = store.len(), "Swept expired fallback entries");
                        }
                        // Let queued request work run between sweeps.
                        tokio::task::yield_now().await;
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        tracing::debug!("Fallback sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn make_room(&self, incoming: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(incoming) {
            return;
        }
        if self.purge_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::debug!(key = %key, max_entries = self.max_entries, "Evicted fallback entry closest to expiry");
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if hit {
            // Re-check under the shard lock: a concurrent set may have replaced it.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()> {
        if ttl_secs <= 0 {
            self.entries.remove(key);
            return Ok(());
        }
        self.make_room(key);
        let ttl = Duration::from_secs(ttl_secs.min(MAX_TTL_SECS) as u64);
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
