//! The serialized value store contract shared by every backend.

use async_trait::async_trait;
use serde_json::Value;

use crate::counter::{WindowCount, WindowRequest};
use crate::error::Result;

/// String-keyed storage of JSON values with per-entry expiry.
///
/// `ttl_secs <= 0` means "expire immediately": a `set` with such a TTL leaves
/// the key absent, whatever was stored under it before.
///
/// Both bulk invalidations are O(n) in the number of stored keys on every
/// backend. Callers invalidating on hot paths should prefer exact keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name used in logs and stats.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key starting with `prefix`, returning how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Removes every entry held by this backend.
    async fn clear(&self) -> Result<()>;

    /// Atomic fixed-window check-and-increment.
    ///
    /// Backends without a native primitive return `Ok(None)` and the caller
    /// falls back to a read-then-write sequence.
    async fn increment_window(&self, _key: &str, _request: WindowRequest) -> Result<Option<WindowCount>> {
        Ok(None)
    }
}
