//! Networked cache backend (Redis).
//!
//! Values are stored as JSON strings under `key_prefix + key`. Commands are
//! only attempted while the shared [`ConnectionStatus`] says `Connected`;
//! otherwise they fail fast with [`CacheError::Unavailable`] so the caller can
//! move on to the fallback immediately.
//!
//! A supervisor task ([`RedisStore::spawn_supervisor`]) owns the lifecycle:
//! initial connect, health pings, and reconnect with linear, capped backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Manager, Pool, Runtime};
use redis::{AsyncCommands, IntoConnectionInfo};
use serde_json::Value;
use tokio::sync::watch;

use crate::config::RedisConfig;
use crate::connection::{Backoff, ConnectionEvent, ConnectionStatus};
use crate::counter::{WindowCount, WindowRequest};
use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use crate::task::{BackgroundTask, shutdown_requested};

const BACKEND: &str = "redis";

/// Keys fetched per SCAN round trip during prefix deletes.
const SCAN_BATCH: usize = 500;

/// Check-and-increment of a fixed window, atomically, in the same JSON shape
/// as [`WindowCounter`](crate::WindowCounter).
const WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local count = 0
local reset_at = now + window
local raw = redis.call('GET', KEYS[1])
if raw then
  local ok, counter = pcall(cjson.decode, raw)
  if ok and type(counter) == 'table' then
    local c = tonumber(counter.count)
    local r = tonumber(counter.reset_at)
    if c and r and r > now then
      count = c
      reset_at = r
    end
  end
end
if count >= max then
  return {0, count, reset_at}
end
count = count + 1
redis.call('SET', KEYS[1], cjson.encode({count = count, reset_at = reset_at}), 'PX', reset_at - now)
return {1, count, reset_at}
"#;

pub struct RedisStore {
    pool: Pool,
    status: ConnectionStatus,
    key_prefix: String,
    connect_timeout: Duration,
    command_timeout: Duration,
    backoff: Backoff,
    health_check: Option<Duration>,
    window_script: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("state", &self.status.current())
            .finish()
    }
}

impl RedisStore {
    /// Build the client. No connection is attempted until the supervisor runs.
    pub fn new(config: &RedisConfig, status: ConnectionStatus) -> Result<Self> {
        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }
        if config.database != 0 {
            info.redis.db = config.database;
        }

        let manager = Manager::new(info)?;
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(config.connect_timeout()))
            .create_timeout(Some(config.connect_timeout()))
            .recycle_timeout(Some(config.connect_timeout()))
            .build()
            .map_err(|e| CacheError::configuration(format!("failed to build Redis pool: {e}")))?;

        Ok(Self {
            pool,
            status,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            backoff: config.backoff(),
            health_check: config.health_check_interval(),
            window_script: redis::Script::new(WINDOW_SCRIPT),
        })
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run one command: fail fast unless connected, bound it by `timeout`,
    /// and report connection-level failures to the status.
    async fn run<T, F>(&self, operation: &'static str, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.status.is_connected() {
            return Err(CacheError::Unavailable { backend: BACKEND });
        }

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_error() {
                    self.status.report(ConnectionEvent::Error(e.to_string()));
                }
                Err(e)
            }
            Err(_) => Err(CacheError::Timeout {
                operation,
                after: timeout,
            }),
        }
    }

    /// PING over a pooled connection, bounded by the connect timeout.
    pub async fn ping(&self) -> Result<()> {
        let attempt = async {
            let mut conn = self.pool.get().await?;
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), CacheError>(())
        };
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation: "ping",
                after: self.connect_timeout,
            }),
        }
    }

    /// Start the connection supervisor.
    pub fn spawn_supervisor(self: &Arc<Self>) -> BackgroundTask {
        let store = Arc::clone(self);
        BackgroundTask::spawn("redis-supervisor", move |mut shutdown| async move {
            store.supervise(&mut shutdown).await;
            store.status.report(ConnectionEvent::Closed);
        })
    }

    async fn supervise(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut state_rx = self.status.subscribe();
        let mut attempt: u32 = 0;
        self.status.report(ConnectionEvent::Connecting);

        loop {
            let _ = state_rx.borrow_and_update();

            if self.status.is_connected() {
                attempt = 0;
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = health_tick(self.health_check) => {
                        if let Err(e) = self.ping().await {
                            self.status.report(ConnectionEvent::Error(e.to_string()));
                        } else {
                            tracing::trace!(backend = BACKEND, "Health check passed");
                        }
                    }
                    _ = shutdown_requested(shutdown) => return,
                }
                continue;
            }

            match self.ping().await {
                Ok(()) => {
                    self.status.report(ConnectionEvent::Ready);
                }
                Err(e) => {
                    self.status.report(ConnectionEvent::Error(e.to_string()));
                    attempt = attempt.saturating_add(1);
                    let delay = self.backoff.delay(attempt);
                    self.status
                        .report(ConnectionEvent::Reconnecting { attempt, delay });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(shutdown) => return,
                    }
                }
            }
        }
    }

    async fn scan_and_delete(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: u64 = redis::cmd("UNLINK").arg(&keys).query_async(&mut conn).await?;
                removed += n;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }

    fn bulk_timeout(&self) -> Duration {
        self.command_timeout.saturating_mul(10)
    }
}

async fn health_tick(every: Option<Duration>) {
    match every {
        Some(every) => tokio::time::sleep(every).await,
        None => std::future::pending().await,
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.namespaced(key);
        let raw: Option<String> = self
            .run("get", self.command_timeout, async {
                let mut conn = self.pool.get().await?;
                Ok::<_, CacheError>(conn.get(&key).await?)
            })
            .await?;

        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Malformed cached payload, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: i64) -> Result<()> {
        if ttl_secs <= 0 {
            return self.delete(key).await;
        }
        let key = self.namespaced(key);
        let payload = serde_json::to_string(value)?;
        self.run("set", self.command_timeout, async {
            let mut conn = self.pool.get().await?;
            let _: () = conn.set_ex(&key, payload, ttl_secs as u64).await?;
            Ok::<(), CacheError>(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.namespaced(key);
        self.run("delete", self.command_timeout, async {
            let mut conn = self.pool.get().await?;
            let _: () = conn.del(&key).await?;
            Ok::<(), CacheError>(())
        })
        .await
    }

    /// O(n) over the whole keyspace: incremental `SCAN MATCH` plus `UNLINK`
    /// per batch.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", escape_glob(&self.namespaced(prefix)));
        let removed = self
            .run("delete_by_prefix", self.bulk_timeout(), self.scan_and_delete(&pattern))
            .await?;
        tracing::debug!(prefix = %prefix, removed, "Redis prefix delete");
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return self
                .run("clear", self.bulk_timeout(), async {
                    let mut conn = self.pool.get().await?;
                    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
                    Ok::<(), CacheError>(())
                })
                .await;
        }
        self.delete_by_prefix("").await.map(|_| ())
    }

    async fn increment_window(&self, key: &str, request: WindowRequest) -> Result<Option<WindowCount>> {
        let key = self.namespaced(key);
        let (allowed, count, reset_at): (i64, i64, i64) = self
            .run("increment_window", self.command_timeout, async {
                let mut conn = self.pool.get().await?;
                Ok::<_, CacheError>(self
                    .window_script
                    .key(&key)
                    .arg(request.now_millis)
                    .arg(request.window_millis.max(1))
                    .arg(request.max)
                    .invoke_async(&mut conn)
                    .await?)
            })
            .await?;

        Ok(Some(WindowCount {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            reset_at,
        }))
    }
}
