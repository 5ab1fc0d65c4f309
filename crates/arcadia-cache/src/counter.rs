//! Fixed-window counter format shared by the rate limiter and the Redis
//! increment script. Both paths must read and write the same JSON shape so a
//! counter written by one is understood by the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored state of one rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    pub count: u64,
    /// Unix milliseconds at which the window resets.
    pub reset_at: i64,
}

impl WindowCounter {
    pub fn new(count: u64, reset_at: i64) -> Self {
        Self { count, reset_at }
    }

    /// Decode a stored value. Anything malformed reads as "no counter".
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "count": self.count, "reset_at": self.reset_at })
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.reset_at
    }

    /// Whole seconds left in the window, rounded up, never below one.
    pub fn remaining_ttl_secs(&self, now_millis: i64) -> i64 {
        let left = (self.reset_at - now_millis).max(0);
        ((left + 999) / 1000).max(1)
    }
}

/// Parameters for one check-and-increment against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    pub now_millis: i64,
    pub window_millis: i64,
    pub max: u64,
}

/// Outcome of a check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub allowed: bool,
    /// Counter value after this call (unchanged when rejected).
    pub count: u64,
    pub reset_at: i64,
}

impl WindowRequest {
    /// Apply this request to an existing counter (or none) and return the
    /// outcome plus the counter to store, if it changed.
    pub fn apply(&self, current: Option<WindowCounter>) -> (WindowCount, Option<WindowCounter>) {
        let live = current.filter(|c| !c.is_expired(self.now_millis));
        let (count, reset_at) = match live {
            Some(c) => (c.count, c.reset_at),
            None => (0, self.now_millis + self.window_millis),
        };

        if count >= self.max {
            return (
                WindowCount {
                    allowed: false,
                    count,
                    reset_at,
                },
                None,
            );
        }

        let next = WindowCounter::new(count + 1, reset_at);
        (
            WindowCount {
                allowed: true,
                count: next.count,
                reset_at,
            },
            Some(next),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(now: i64) -> WindowRequest {
        WindowRequest {
            now_millis: now,
            window_millis: 60_000,
            max: 2,
        }
    }

    #[test]
    fn test_fresh_window() {
        let (outcome, stored) = request(1_000).apply(None);
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.reset_at, 61_000);
        assert_eq!(stored, Some(WindowCounter::new(1, 61_000)));
    }

    #[test]
    fn test_increment_keeps_original_reset() {
        let (outcome, stored) = request(30_000).apply(Some(WindowCounter::new(1, 61_000)));
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 2);
        assert_eq!(stored, Some(WindowCounter::new(2, 61_000)));
    }

    #[test]
    fn test_limit_reached_does_not_increment() {
        let (outcome, stored) = request(30_000).apply(Some(WindowCounter::new(2, 61_000)));
        assert!(!outcome.allowed);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.reset_at, 61_000);
        assert_eq!(stored, None);
    }

    #[test]
    fn test_expired_counter_starts_new_window() {
        let (outcome, stored) = request(61_000).apply(Some(WindowCounter::new(2, 61_000)));
        assert!(outcome.allowed);
        assert_eq!(outcome.reset_at, 121_000);
        assert_eq!(stored, Some(WindowCounter::new(1, 121_000)));
    }

    #[test]
    fn test_zero_max_rejects() {
        let req = WindowRequest {
            max: 0,
            ..request(0)
        };
        let (outcome, stored) = req.apply(None);
        assert!(!outcome.allowed);
        assert!(stored.is_none());
    }

    #[test]
    fn test_remaining_ttl_rounds_up() {
        let counter = WindowCounter::new(1, 10_500);
        assert_eq!(counter.remaining_ttl_secs(10_000), 1);
        assert_eq!(counter.remaining_ttl_secs(0), 11);
        assert_eq!(counter.remaining_ttl_secs(20_000), 1);
    }

    #[test]
    fn test_malformed_value_reads_as_absent() {
        assert!(WindowCounter::from_value(&serde_json::json!(3)).is_none());
        assert!(WindowCounter::from_value(&serde_json::json!({"count": "x"})).is_none());
        let value = WindowCounter::new(4, 99).to_value();
        assert_eq!(WindowCounter::from_value(&value), Some(WindowCounter::new(4, 99)));
    }
}
