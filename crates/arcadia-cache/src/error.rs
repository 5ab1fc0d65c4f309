use std::time::Duration;

use thiserror::Error;

/// Errors produced by cache backends.
///
/// Backends return these freely; the [`FailoverCache`](crate::FailoverCache)
/// logs and swallows everything except [`CacheError::InvalidKey`], which
/// signals a bug in the caller rather than a runtime condition.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Cache backend '{backend}' is unavailable")]
    Unavailable { backend: &'static str },

    #[error("Cache operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create a new InvalidKey error
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey(reason.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error means the connection itself is gone (as opposed
    /// to a single command failing on a healthy connection).
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) | Self::Pool(deadpool_redis::PoolError::Backend(e)) => {
                redis_connection_lost(e)
            }
            // Create/recycle timeouts and a closed pool all mean no usable connection.
            Self::Pool(_) => true,
            _ => false,
        }
    }

    /// Whether this error was caused by the caller (bad key, bad input).
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }
}

fn redis_connection_lost(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Rejects keys that can never be valid: empty or whitespace-only.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::invalid_key("key must not be empty"));
    }
    Ok(())
}
