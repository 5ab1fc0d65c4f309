use thiserror::Error;

/// Invalid rate-limit configuration. Raised once at startup, never per request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitConfigError {
    #[error("rate_limit.status_code {0} is not a 4xx or 5xx status")]
    InvalidStatus(u16),

    #[error("rate_limit.{field}: window_secs and max_requests must be > 0")]
    EmptyQuota { field: String },

    #[error("rate_limit.paths: prefix must not be empty")]
    EmptyPrefix,

    #[error("rate_limit.policy = \"path\" needs at least one entry in rate_limit.paths")]
    NoPathRules,
}

impl RateLimitConfigError {
    pub fn empty_quota(field: impl Into<String>) -> Self {
        Self::EmptyQuota {
            field: field.into(),
        }
    }
}
