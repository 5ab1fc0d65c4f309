//! Fixed-window rate limiter on top of the failover cache.
//!
//! ```text
//! UNSEEN (count=0) ──► ACTIVE (0 < count < max) ──► LIMITED (count >= max)
//!      ▲                                                    │
//!      └──────────────── window reset passes ───────────────┘
//! ```
//!
//! When the cache routes to Redis the check-and-increment runs as one atomic
//! script. Otherwise it is a read-then-write through the cache, and two
//! concurrent requests for the same key may both be counted as one. That
//! path is an approximation, not a strict bound.

use std::sync::Arc;

use arcadia_cache::clock::from_millis;
use arcadia_cache::{CacheError, Clock, FailoverCache, WindowCount, WindowCounter, WindowRequest};
use time::OffsetDateTime;

/// Namespace for every counter key.
pub const KEY_PREFIX: &str = "rate-limit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: OffsetDateTime,
}

impl RateLimitDecision {
    /// Reset time as unix seconds, rounded up.
    pub fn reset_unix_secs(&self) -> i64 {
        let millis = (self.reset_at.unix_timestamp_nanos() / 1_000_000) as i64;
        (millis + 999).div_euclid(1000)
    }

    /// Whole seconds until the window resets, never below one.
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> u64 {
        let left = (self.reset_at - now).whole_milliseconds().max(0);
        (((left + 999) / 1000) as u64).max(1)
    }
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    cache: FailoverCache,
}

impl RateLimiter {
    /// The limiter shares the application's cache instance, and with it the
    /// same view of the networked backend.
    pub fn new(cache: FailoverCache) -> Self {
        Self { cache }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.cache.clock()
    }

    /// Count one request against `request_key` and decide whether it may
    /// proceed. Never fails: internal errors allow the request.
    pub async fn check_and_increment(
        &self,
        request_key: &str,
        window_secs: u64,
        max_requests: u64,
    ) -> RateLimitDecision {
        let key = format!("{KEY_PREFIX}{request_key}");
        let request = WindowRequest {
            now_millis: self.cache.clock().now_millis(),
            window_millis: i64::try_from(window_secs).unwrap_or(i64::MAX).saturating_mul(1000),
            max: max_requests,
        };

        let outcome = match self.cache.increment_window(&key, request).await {
            Some(outcome) => outcome,
            None => match self.increment_relaxed(&key, request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Rate limiter failed, allowing request");
                    return RateLimitDecision {
                        allowed: true,
                        limit: max_requests,
                        remaining: max_requests,
                        reset_at: from_millis(request.now_millis.saturating_add(request.window_millis)),
                    };
                }
            },
        };

        if !outcome.allowed {
            tracing::debug!(key = %key, count = outcome.count, limit = max_requests, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed: outcome.allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(outcome.count),
            reset_at: from_millis(outcome.reset_at),
        }
    }

    /// Read-then-write against whichever backend the cache routes to.
    /// The counter keeps its original expiry: traffic never extends a window.
    async fn increment_relaxed(&self, key: &str, request: WindowRequest) -> Result<WindowCount, CacheError> {
        let current = self
            .cache
            .get(key)
            .await?
            .as_ref()
            .and_then(WindowCounter::from_value);

        let (outcome, updated) = request.apply(current);
        if let Some(counter) = updated {
            self.cache
                .set(key, &counter.to_value(), counter.remaining_ttl_secs(request.now_millis))
                .await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcadia_cache::ManualClock;
    use std::time::Duration;
    use time::macros::datetime;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(datetime!(2026-03-01 12:00 UTC));
        let cache = FailoverCache::builder()
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        (RateLimiter::new(cache), clock)
    }

    #[tokio::test]
    async fn test_fourth_request_is_rejected() {
        let (limiter, _) = limiter();
        let mut allowed = Vec::new();
        let mut last = None;
        for _ in 0..4 {
            let decision = limiter.check_and_increment("198.51.100.7", 60, 3).await;
            allowed.push(decision.allowed);
            last = Some(decision);
        }
        assert_eq!(allowed, vec![true, true, true, false]);

        let last = last.unwrap();
        assert_eq!(last.remaining, 0);
        assert_eq!(last.limit, 3);
        assert_eq!(last.reset_at, datetime!(2026-03-01 12:01 UTC));
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let (limiter, _) = limiter();
        let remaining: Vec<u64> = [
            limiter.check_and_increment("k", 60, 3).await.remaining,
            limiter.check_and_increment("k", 60, 3).await.remaining,
            limiter.check_and_increment("k", 60, 3).await.remaining,
        ]
        .to_vec();
        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (limiter, clock) = limiter();
        for _ in 0..3 {
            limiter.check_and_increment("k", 60, 3).await;
        }
        assert!(!limiter.check_and_increment("k", 60, 3).await.allowed);

        clock.advance(Duration::from_secs(60));
        let decision = limiter.check_and_increment("k", 60, 3).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_at, datetime!(2026-03-01 12:02 UTC));
    }

    #[tokio::test]
    async fn test_traffic_does_not_extend_window() {
        let (limiter, clock) = limiter();
        let first = limiter.check_and_increment("k", 60, 10).await;

        clock.advance(Duration::from_secs(45));
        let later = limiter.check_and_increment("k", 60, 10).await;
        assert_eq!(later.reset_at, first.reset_at);

        clock.advance(Duration::from_secs(15));
        let fresh = limiter.check_and_increment("k", 60, 10).await;
        assert_eq!(fresh.remaining, 9);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _) = limiter();
        assert!(limiter.check_and_increment("a", 60, 1).await.allowed);
        assert!(!limiter.check_and_increment("a", 60, 1).await.allowed);
        assert!(limiter.check_and_increment("b", 60, 1).await.allowed);
    }

    #[tokio::test]
    async fn test_retry_after_and_reset_header_values() {
        let (limiter, clock) = limiter();
        let decision = limiter.check_and_increment("k", 60, 1).await;
        clock.advance(Duration::from_millis(59_200));
        assert_eq!(decision.retry_after_secs(clock.now()), 1);
        assert_eq!(
            decision.reset_unix_secs(),
            datetime!(2026-03-01 12:01 UTC).unix_timestamp()
        );
    }
}
