//! Fixed-window rate limiting for the Arcadia storefront.
//!
//! Counters live in the shared [`arcadia_cache::FailoverCache`], so limits
//! hold across instances while Redis is reachable and degrade to per-process
//! limits while it isn't. Every failure path allows the request.

pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod policy;

pub use config::{PathRuleConfig, PolicyKind, QuotaConfig, RateLimitConfig};
pub use error::RateLimitConfigError;
pub use limiter::{KEY_PREFIX, RateLimitDecision, RateLimiter};
pub use middleware::{
    RateLimitOptions, RateLimitState, RateLimited, extract_client_ip, rate_limit_middleware,
};
pub use policy::{Identity, LimitTarget, PathRule, Quota, RateLimitPolicy, RequestInfo};
