use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::Backoff;

/// Networked cache (Redis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Password, if not embedded in the URL
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: i64,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Timeout for establishing a connection, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single command, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Reconnect delay grows by this much per attempt
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Reconnect delay cap
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// PING interval while connected (0 disables)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_backoff_step_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_health_check_interval_secs() -> u64 {
    15
}

fn default_key_prefix() -> String {
    "arcadia:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            password: None,
            database: 0,
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.trim().is_empty() {
            return Err("redis.url must not be empty".into());
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.database < 0 {
            return Err("redis.database must be >= 0".into());
        }
        if self.connect_timeout_ms == 0 || self.command_timeout_ms == 0 {
            return Err("redis timeouts must be > 0".into());
        }
        if self.backoff_step_ms == 0 || self.backoff_max_ms < self.backoff_step_ms {
            return Err("redis.backoff_max_ms must be >= redis.backoff_step_ms > 0".into());
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            step: Duration::from_millis(self.backoff_step_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.health_check_interval_secs))
    }
}

/// Cache behaviour shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when callers don't pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: i64,

    /// How often the fallback drops expired entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Fallback max entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Invalidations remembered while the networked backend is down
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

fn default_ttl_secs() -> i64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_entries() -> usize {
    10000
}

fn default_journal_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_entries: default_max_entries(),
            journal_capacity: default_journal_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs <= 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        if self.max_entries == 0 {
            return Err("cache.max_entries must be > 0".into());
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
