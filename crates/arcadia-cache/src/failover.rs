//! Failover controller: one cache facade over a networked backend and an
//! in-process fallback.
//!
//! ## Routing
//!
//! ```text
//! call ──► connected && reconciled? ──yes──► networked ──error──► fallback (this call only)
//!                    │
//!                    no
//!                    ▼
//!                 fallback (+ journal invalidations for later replay)
//! ```
//!
//! ## Recovery
//!
//! While the networked backend is down, writes land in the fallback and every
//! touched key is journaled, writes included: an outage write that expires or
//! is evicted before reconnect must still shadow the pre-outage networked
//! copy. When the connection comes back, routing stays on the fallback until
//! [`FailoverCache::reconcile`] has replayed the journal and copied live
//! fallback entries across. Only then do reads switch back, so stale
//! pre-outage data is never served.
//!
//! Reconciliation runs in passes without blocking callers. Each pass drains
//! the journal, so keys written meanwhile are picked up by the next one. Only
//! the final, short pass runs with fallback writes paused, and writers give up
//! waiting after [`GATE_WAIT`] and proceed on the fallback.
//!
//! No operation surfaces a backend failure to the caller. The only error ever
//! returned is [`CacheError::InvalidKey`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock, RwLockReadGuard, watch};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, RedisConfig};
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::counter::{WindowCount, WindowRequest};
use crate::error::{CacheError, Result, validate_key};
use crate::memory::MemoryStore;
use crate::redis::RedisStore;
use crate::store::CacheStore;
use crate::task::{BackgroundTask, shutdown_requested};

/// Delay before retrying a reconciliation that failed without a state change.
const RECONCILE_RETRY: Duration = Duration::from_secs(5);

/// Longest a fallback write waits for a reconciliation's final pass.
pub const GATE_WAIT: Duration = Duration::from_millis(200);

/// Unlocked passes before the final one runs with writes paused.
const RECONCILE_PASSES: usize = 4;

/// Journal size small enough to finish with writes paused.
const FINAL_PASS_LIMIT: usize = 32;

/// Where calls are currently routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// No networked backend configured.
    LocalOnly,
    Networked,
    Fallback,
    /// Connected again, fallback contents not yet reconciled.
    Recovering,
}

/// Snapshot for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: CacheMode,
    pub connection: Option<ConnectionState>,
    pub fallback_entries: usize,
    pub pending_invalidations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Invalidation {
    Key(String),
    Prefix(String),
    All,
}

/// Invalidations to replay against the networked backend after an outage.
///
/// Every entry is a delete, so replay order does not matter and a key is
/// recorded at most once.
#[derive(Debug)]
struct Journal {
    entries: Vec<Invalidation>,
    keys: HashSet<String>,
    capacity: usize,
}

impl Journal {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            keys: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, invalidation: Invalidation) {
        // A pending full clear subsumes everything recorded after it.
        if self.entries.first() == Some(&Invalidation::All) {
            return;
        }
        if let Invalidation::Key(key) = &invalidation {
            if self.keys.contains(key) {
                return;
            }
        }
        if invalidation == Invalidation::All || self.entries.len() >= self.capacity {
            self.entries.clear();
            self.keys.clear();
            self.entries.push(Invalidation::All);
            return;
        }
        if let Invalidation::Key(key) = &invalidation {
            self.keys.insert(key.clone());
        }
        self.entries.push(invalidation);
    }

    fn take(&mut self) -> Vec<Invalidation> {
        self.keys.clear();
        std::mem::take(&mut self.entries)
    }

    /// Put back entries that failed to replay.
    fn restore(&mut self, earlier: Vec<Invalidation>) {
        for invalidation in earlier {
            self.record(invalidation);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_full_clear(&self) -> bool {
        self.entries.first() == Some(&Invalidation::All)
    }
}

struct Inner {
    networked: Option<Arc<dyn CacheStore>>,
    fallback: Arc<MemoryStore>,
    status: ConnectionStatus,
    clock: Arc<dyn Clock>,
    default_ttl_secs: i64,
    journal: Mutex<Journal>,
    /// Set while the fallback holds writes or invalidations the networked
    /// backend has not seen yet.
    pending_recovery: AtomicBool,
    /// Held for writing during the final reconciliation pass; fallback
    /// writes take it for reading.
    recovery_gate: RwLock<()>,
    /// One reconciliation at a time.
    reconciling: AsyncMutex<()>,
    recovery_wake: Arc<Notify>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

/// The cache every consumer shares. Cheap to clone.
#[derive(Clone)]
pub struct FailoverCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FailoverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverCache")
            .field("mode", &self.mode())
            .field("fallback_entries", &self.inner.fallback.len())
            .finish()
    }
}

enum NetworkedSource {
    Redis(RedisConfig),
    Custom(Box<dyn FnOnce(ConnectionStatus) -> Arc<dyn CacheStore> + Send>),
}

/// Builder for [`FailoverCache`].
pub struct FailoverCacheBuilder {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    networked: Option<NetworkedSource>,
}

impl Default for FailoverCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverCacheBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
            networked: None,
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use Redis as the networked backend (ignored when `enabled` is false).
    pub fn with_redis(mut self, config: RedisConfig) -> Self {
        self.networked = Some(NetworkedSource::Redis(config));
        self
    }

    /// Use a custom networked backend. The factory receives the status handle
    /// the backend must report its connection events to.
    pub fn with_networked<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(ConnectionStatus) -> Arc<dyn CacheStore> + Send + 'static,
    {
        self.networked = Some(NetworkedSource::Custom(Box::new(factory)));
        self
    }

    /// Build the controller and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<FailoverCache> {
        self.config.validate().map_err(CacheError::configuration)?;

        let status = ConnectionStatus::new("redis");
        let fallback = Arc::new(MemoryStore::new(self.clock.clone(), self.config.max_entries));
        let mut tasks = vec![fallback.spawn_sweeper(self.config.sweep_interval())];

        let networked: Option<Arc<dyn CacheStore>> = match self.networked {
            Some(NetworkedSource::Redis(redis)) if redis.enabled => {
                redis.validate().map_err(CacheError::configuration)?;
                tracing::info!(url = %redis.url, database = redis.database, "Using Redis as networked cache");
                let store = Arc::new(RedisStore::new(&redis, status.clone())?);
                tasks.push(store.spawn_supervisor());
                Some(store)
            }
            Some(NetworkedSource::Redis(_)) | None => {
                tracing::info!("Redis disabled, using local cache only");
                None
            }
            Some(NetworkedSource::Custom(factory)) => Some(factory(status.clone())),
        };

        let recovery_wake = Arc::new(Notify::new());
        let has_networked = networked.is_some();
        let inner = Arc::new(Inner {
            networked,
            fallback,
            status: status.clone(),
            clock: self.clock,
            default_ttl_secs: self.config.default_ttl_secs,
            journal: Mutex::new(Journal::new(self.config.journal_capacity)),
            pending_recovery: AtomicBool::new(false),
            recovery_gate: RwLock::new(()),
            reconciling: AsyncMutex::new(()),
            recovery_wake: recovery_wake.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        if has_networked {
            tasks.push(spawn_recovery(
                Arc::downgrade(&inner),
                status.subscribe(),
                recovery_wake,
            ));
        }
        *inner.tasks.lock() = tasks;

        Ok(FailoverCache { inner })
    }
}

fn spawn_recovery(
    cache: Weak<Inner>,
    mut state_rx: watch::Receiver<ConnectionState>,
    wake: Arc<Notify>,
) -> BackgroundTask {
    BackgroundTask::spawn("cache-recovery", move |mut shutdown| async move {
        let mut retry: Option<Duration> = None;
        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = wake.notified() => {}
                _ = sleep_for(retry) => {}
                _ = shutdown_requested(&mut shutdown) => return,
            }

            let Some(inner) = cache.upgrade() else {
                return;
            };
            let cache = FailoverCache { inner };
            retry = match cache.reconcile().await {
                Ok(_) => None,
                Err(()) => Some(RECONCILE_RETRY),
            };
        }
    })
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

/// Log a backend failure on the request path.
fn log_failure(backend: &'static str, operation: &'static str, key: &str, error: &CacheError) {
    tracing::error!(backend, operation, key = %key, error = %error, "Cache operation failed");
}

impl FailoverCache {
    pub fn builder() -> FailoverCacheBuilder {
        FailoverCacheBuilder::new()
    }

    /// Local-only cache with default settings.
    pub fn local() -> Result<Self> {
        FailoverCacheBuilder::new().build()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.networked.as_ref().map(|_| self.inner.status.current())
    }

    pub fn mode(&self) -> CacheMode {
        match &self.inner.networked {
            None => CacheMode::LocalOnly,
            Some(_) if !self.inner.status.is_connected() => CacheMode::Fallback,
            Some(_) if self.inner.pending_recovery.load(Ordering::Acquire) => CacheMode::Recovering,
            Some(_) => CacheMode::Networked,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self.mode(),
            connection: self.connection_state(),
            fallback_entries: self.inner.fallback.len(),
            pending_invalidations: self.inner.journal.lock().len(),
        }
    }

    /// The networked backend, if calls should go to it right now.
    fn live_networked(&self) -> Option<&Arc<dyn CacheStore>> {
        self.inner
            .networked
            .as_ref()
            .filter(|_| self.inner.status.is_connected())
            .filter(|_| !self.inner.pending_recovery.load(Ordering::Acquire))
    }

    /// Note that the fallback diverged from the networked backend.
    fn mark_pending(&self) {
        if self.inner.networked.is_none() {
            return;
        }
        self.inner.pending_recovery.store(true, Ordering::Release);
        if self.inner.status.is_connected() {
            self.inner.recovery_wake.notify_one();
        }
    }

    fn journal(&self, invalidation: Invalidation) {
        if self.inner.networked.is_some() {
            self.inner.journal.lock().record(invalidation);
        }
    }

    /// Wait, briefly, for a final reconciliation pass to finish.
    ///
    /// `None` means the wait timed out and the caller proceeds on the
    /// fallback anyway; its journal entry keeps recovery pending.
    async fn enter_gate(&self) -> Option<RwLockReadGuard<'_, ()>> {
        match tokio::time::timeout(GATE_WAIT, self.inner.recovery_gate.read()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!(waited_ms = GATE_WAIT.as_millis() as u64, "Reconciliation still running, writing to fallback");
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;

        if let Some(networked) = self.live_networked() {
            match networked.get(key).await {
                Ok(value) => {
                    tracing::debug!(key = %key, hit = value.is_some(), backend = networked.backend(), "cache get");
                    return Ok(value);
                }
                Err(e) => log_failure(networked.backend(), "get", key, &e),
            }
        }

        match self.inner.fallback.get(key).await {
            Ok(value) => {
                tracing::debug!(key = %key, hit = value.is_some(), backend = "memory", "cache get");
                Ok(value)
            }
            Err(e) => {
                log_failure("memory", "get", key, &e);
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()> {
        validate_key(key)?;

        loop {
            if let Some(networked) = self.live_networked() {
                match networked.set(key, value, ttl_secs).await {
                    Ok(()) => return Ok(()),
                    Err(e) => log_failure(networked.backend(), "set", key, &e),
                }
                let _gate = self.enter_gate().await;
                self.fallback_set(key, value, ttl_secs).await;
                self.mark_pending();
                return Ok(());
            }

            let _gate = self.enter_gate().await;
            if self.live_networked().is_some() {
                continue;
            }
            self.fallback_set(key, value, ttl_secs).await;
            self.mark_pending();
            return Ok(());
        }
    }

    /// `set` with the configured default TTL.
    pub async fn set_with_default_ttl(&self, key: &str, value: &Value) -> Result<()> {
        self.set(key, value, self.inner.default_ttl_secs).await
    }

    async fn fallback_set(&self, key: &str, value: &Value, ttl_secs: i64) {
        // The networked copy is stale from here on, even if this entry
        // expires or is evicted before recovery.
        self.journal(Invalidation::Key(key.to_string()));
        if let Err(e) = self.inner.fallback.set(key, value, ttl_secs).await {
            log_failure("memory", "set", key, &e);
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.invalidate(Invalidation::Key(key.to_string())).await;
        Ok(())
    }

    /// Remove every key starting with `prefix` from both backends.
    ///
    /// Cost is O(n) in the number of stored keys on each backend. Returns the
    /// number of keys removed from whichever backends were reachable.
    pub async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        validate_key(prefix)?;
        Ok(self.invalidate(Invalidation::Prefix(prefix.to_string())).await)
    }

    /// Remove every entry from both backends.
    pub async fn clear(&self) {
        self.invalidate(Invalidation::All).await;
    }

    /// Apply an invalidation to the networked backend when it is reachable
    /// and always to the fallback. If the networked side can't take it, it
    /// is journaled and replayed on recovery.
    async fn invalidate(&self, invalidation: Invalidation) -> u64 {
        let mut removed = 0;

        loop {
            if let Some(networked) = self.live_networked() {
                let result = match &invalidation {
                    Invalidation::Key(key) => networked.delete(key).await.map(|_| 0),
                    Invalidation::Prefix(prefix) => networked.delete_by_prefix(prefix).await,
                    Invalidation::All => networked.clear().await.map(|_| 0),
                };
                let _gate = self.enter_gate().await;
                match result {
                    Ok(n) => removed += n,
                    Err(e) => {
                        log_failure(networked.backend(), invalidation.operation(), invalidation.target(), &e);
                        self.journal(invalidation.clone());
                        self.mark_pending();
                    }
                }
                removed += self.fallback_invalidate(&invalidation).await;
                return removed;
            }

            let _gate = self.enter_gate().await;
            if self.live_networked().is_some() {
                continue;
            }
            self.journal(invalidation.clone());
            removed += self.fallback_invalidate(&invalidation).await;
            self.mark_pending();
            return removed;
        }
    }

    async fn fallback_invalidate(&self, invalidation: &Invalidation) -> u64 {
        let fallback = &self.inner.fallback;
        let result = match invalidation {
            Invalidation::Key(key) => fallback.delete(key).await.map(|_| 0),
            Invalidation::Prefix(prefix) => fallback.delete_by_prefix(prefix).await,
            Invalidation::All => fallback.clear().await.map(|_| 0),
        };
        result.unwrap_or_else(|e| {
            log_failure("memory", invalidation.operation(), invalidation.target(), &e);
            0
        })
    }

    /// Atomic window increment on the networked backend, when calls are
    /// routed there and it supports one. `None` means the caller must use
    /// the read-then-write path.
    pub async fn increment_window(&self, key: &str, request: WindowRequest) -> Option<WindowCount> {
        let networked = self.live_networked()?;
        match networked.increment_window(key, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_failure(networked.backend(), "increment_window", key, &e);
                None
            }
        }
    }

    /// Decode a cached value; undecodable payloads read as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached payload has unexpected shape, treating as miss");
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: i64) -> Result<()> {
        validate_key(key)?;
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, &value, ttl_secs).await,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to serialize value for cache");
                Ok(())
            }
        }
    }

    /// Read-through: return the cached value for `key`, or run `loader`,
    /// cache its result for `ttl_secs`, and return it.
    ///
    /// Loader errors propagate and nothing is cached; cache problems never do.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, ttl_secs: i64, loader: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        match self.get_json::<T>(key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Read-through skipped cache");
                return loader().await;
            }
        }

        let fresh = loader().await?;
        if let Err(e) = self.set_json(key, &fresh, ttl_secs).await {
            tracing::error!(key = %key, error = %e, "Read-through could not store value");
        }
        Ok(fresh)
    }

    /// Bring the networked backend up to date with the fallback and switch
    /// routing back to it.
    ///
    /// Runs automatically after reconnection; safe to call at any time.
    /// Returns `Ok(true)` when calls are routed to the networked backend
    /// afterwards, `Err(())` when replay failed and should be retried.
    pub async fn reconcile(&self) -> std::result::Result<bool, ()> {
        let Some(networked) = self.inner.networked.as_ref() else {
            return Ok(false);
        };
        if !self.inner.status.is_connected() {
            return Ok(false);
        }

        let _running = self.inner.reconciling.lock().await;
        if !self.inner.pending_recovery.load(Ordering::Acquire) {
            return Ok(true);
        }

        // The first pass copies the whole fallback; later ones only what was
        // touched since the previous pass.
        let mut replayed = self.sync_pass(networked, None).await?;
        for _ in 1..RECONCILE_PASSES {
            let small = {
                let journal = self.inner.journal.lock();
                journal.len() <= FINAL_PASS_LIMIT && !journal.is_full_clear()
            };
            if small {
                break;
            }
            let batch = self.inner.journal.lock().take();
            replayed += self.sync_pass(networked, Some(batch)).await?;
        }

        let _gate = self.inner.recovery_gate.write().await;
        if !self.inner.status.is_connected() {
            return Ok(false);
        }
        let batch = self.inner.journal.lock().take();
        replayed += self.sync_pass(networked, Some(batch)).await?;

        {
            // Writers that gave up on the gate journal before touching the
            // fallback; anything recorded now needs another round.
            let journal = self.inner.journal.lock();
            if journal.len() > 0 {
                tracing::debug!(pending = journal.len(), "Writes arrived during final pass, reconciling again");
                return Err(());
            }
            self.inner.pending_recovery.store(false, Ordering::Release);
        }
        let migrated = self.inner.fallback.len();
        if let Err(e) = self.inner.fallback.clear().await {
            log_failure("memory", "clear", "*", &e);
        }
        tracing::info!(replayed, migrated, "Networked cache reconciled, routing restored");
        Ok(true)
    }

    /// Replay `batch` on the networked backend, then copy the live fallback
    /// entries it covers. `None` takes the whole journal and copies every
    /// live entry.
    async fn sync_pass(
        &self,
        networked: &Arc<dyn CacheStore>,
        batch: Option<Vec<Invalidation>>,
    ) -> std::result::Result<usize, ()> {
        let full = batch.is_none();
        let batch = batch.unwrap_or_else(|| self.inner.journal.lock().take());

        for (idx, invalidation) in batch.iter().enumerate() {
            let result = match invalidation {
                Invalidation::Key(key) => networked.delete(key).await,
                Invalidation::Prefix(prefix) => networked.delete_by_prefix(prefix).await.map(|_| ()),
                Invalidation::All => networked.clear().await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, remaining = batch.len() - idx, "Invalidation replay failed, staying on fallback");
                self.inner.journal.lock().restore(batch[idx..].to_vec());
                return Err(());
            }
        }

        let entries = self.inner.fallback.live_entries();
        for (key, value, ttl_secs) in entries {
            if !full && !batch.iter().any(|invalidation| invalidation.covers(&key)) {
                continue;
            }
            if let Err(e) = networked.set(&key, &value, ttl_secs).await {
                tracing::warn!(key = %key, error = %e, "Fallback migration failed, staying on fallback");
                // Replayed deletes already landed; the entry itself must be
                // copied again by the next attempt.
                self.journal(Invalidation::Key(key));
                return Err(());
            }
        }
        Ok(batch.len())
    }

    /// Stop every background task (sweeper, connection supervisor, recovery).
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            task.stop().await;
        }
        tracing::info!("Cache background tasks stopped");
    }
}

impl Invalidation {
    fn operation(&self) -> &'static str {
        match self {
            Self::Key(_) => "delete",
            Self::Prefix(_) => "delete_by_prefix",
            Self::All => "clear",
        }
    }

    fn covers(&self, key: &str) -> bool {
        match self {
            Self::Key(k) => k == key,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::All => true,
        }
    }

    fn target(&self) -> &str {
        match self {
            Self::Key(key) => key,
            Self::Prefix(prefix) => prefix,
            Self::All => "*",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_journal_records_in_order() {
        let mut journal = Journal::new(10);
        journal.record(Invalidation::Key("a".into()));
        journal.record(Invalidation::Prefix("b:".into()));
        assert_eq!(
            journal.take(),
            vec![Invalidation::Key("a".into()), Invalidation::Prefix("b:".into())]
        );
        assert_eq!(journal.len(), 0);
    }

    #[test]
    fn test_journal_overflow_collapses_to_clear() {
        let mut journal = Journal::new(2);
        journal.record(Invalidation::Key("a".into()));
        journal.record(Invalidation::Key("b".into()));
        journal.record(Invalidation::Key("c".into()));
        assert_eq!(journal.take(), vec![Invalidation::All]);
    }

    #[test]
    fn test_journal_clear_subsumes_later_entries() {
        let mut journal = Journal::new(10);
        journal.record(Invalidation::Key("a".into()));
        journal.record(Invalidation::All);
        journal.record(Invalidation::Key("b".into()));
        assert_eq!(journal.take(), vec![Invalidation::All]);
    }

    #[test]
    fn test_journal_restore_merges_with_newer_entries() {
        let mut journal = Journal::new(10);
        journal.record(Invalidation::Key("new".into()));
        journal.restore(vec![Invalidation::Key("old".into()), Invalidation::Key("new".into())]);
        assert_eq!(
            journal.take(),
            vec![Invalidation::Key("new".into()), Invalidation::Key("old".into())]
        );
    }

    #[test]
    fn test_journal_records_each_key_once() {
        let mut journal = Journal::new(2);
        for _ in 0..5 {
            journal.record(Invalidation::Key("rate-limit:ip:1".into()));
        }
        assert_eq!(journal.len(), 1);
        assert!(!journal.is_full_clear());

        journal.take();
        journal.record(Invalidation::Key("rate-limit:ip:1".into()));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn test_invalidation_covers() {
        assert!(Invalidation::Key("a".into()).covers("a"));
        assert!(!Invalidation::Key("a".into()).covers("ab"));
        assert!(Invalidation::Prefix("games:".into()).covers("games:1"));
        assert!(Invalidation::All.covers("anything"));
    }

    #[tokio::test]
    async fn test_local_only_roundtrip() {
        let cache = FailoverCache::local().unwrap();
        assert_eq!(cache.mode(), CacheMode::LocalOnly);
        assert_eq!(cache.connection_state(), None);

        cache.set("games:1", &json!({"id": 1}), 60).await.unwrap();
        assert_eq!(cache.get("games:1").await.unwrap(), Some(json!({"id": 1})));

        cache.delete("games:1").await.unwrap();
        assert_eq!(cache.get("games:1").await.unwrap(), None);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_key_is_caller_error() {
        let cache = FailoverCache::local().unwrap();
        assert!(cache.get("").await.unwrap_err().is_caller_error());
        assert!(cache.set(" ", &json!(1), 10).await.is_err());
        assert!(cache.delete_by_prefix("").await.is_err());
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Game {
            id: u32,
            title: String,
        }

        let cache = FailoverCache::local().unwrap();
        let game = Game {
            id: 7,
            title: "Outer Rim".into(),
        };
        cache.set_json("games:7", &game, 60).await.unwrap();
        assert_eq!(cache.get_json::<Game>("games:7").await.unwrap(), Some(game));

        // Wrong shape reads as a miss rather than an error.
        cache.set("games:8", &json!("oops"), 60).await.unwrap();
        assert_eq!(cache.get_json::<Game>("games:8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remember_loads_once() {
        let cache = FailoverCache::local().unwrap();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..3 {
            let value: std::result::Result<Vec<u32>, String> = cache
                .remember("games:list", 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(value.unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remember_propagates_loader_error() {
        let cache = FailoverCache::local().unwrap();
        let result: std::result::Result<u32, String> = cache
            .remember("games:count", 60, || async { Err("db down".to_string()) })
            .await;
        assert_eq!(result.unwrap_err(), "db down");
        assert_eq!(cache.get("games:count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = FailoverCache::builder()
            .with_config(CacheConfig {
                max_entries: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }
}
