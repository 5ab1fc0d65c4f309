//! Resilient key-value cache for the Arcadia storefront.
//!
//! ## Cache Modes
//!
//! - **Redis disabled**: in-process store only
//! - **Redis enabled**: Redis is used while connected; every call falls back
//!   to the in-process store while it isn't
//!
//! Consumers only ever see [`FailoverCache`]. Backend failures are logged and
//! absorbed; the cache degrades to a miss, never to an error.

pub mod clock;
pub mod config;
pub mod connection;
pub mod counter;
pub mod error;
pub mod failover;
pub mod memory;
pub mod redis;
pub mod store;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, RedisConfig};
pub use connection::{Backoff, ConnectionEvent, ConnectionState, ConnectionStatus};
pub use counter::{WindowCount, WindowCounter, WindowRequest};
pub use error::{CacheError, Result};
pub use failover::{CacheMode, CacheStats, FailoverCache, FailoverCacheBuilder};
pub use memory::{CachedEntry, MemoryStore};
pub use redis::RedisStore;
pub use store::CacheStore;
pub use task::BackgroundTask;
