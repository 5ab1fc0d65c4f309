use std::collections::HashMap;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::RateLimitConfigError;
use crate::middleware::{DEFAULT_MESSAGE, RateLimitOptions};
use crate::policy::{PathRule, Quota, RateLimitPolicy};

/// Which key policy the HTTP layer applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Ip,
    Role,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    pub max_requests: u64,
}

impl From<QuotaConfig> for Quota {
    fn from(cfg: QuotaConfig) -> Self {
        Quota::new(cfg.window_secs, cfg.max_requests)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRuleConfig {
    pub prefix: String,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    pub max_requests: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether the HTTP layer limits requests at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window for the `ip` policy and for authenticated callers of the `role` policy
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Status code for rejected requests
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    #[serde(default = "default_message")]
    pub message: String,

    #[serde(default)]
    pub policy: PolicyKind,

    /// Per-role quotas for the `role` policy
    #[serde(default)]
    pub roles: HashMap<String, QuotaConfig>,

    /// Quota for unauthenticated callers under the `role` policy
    #[serde(default = "default_anonymous")]
    pub anonymous: QuotaConfig,

    /// Prefix rules for the `path` policy
    #[serde(default)]
    pub paths: Vec<PathRuleConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    100
}

fn default_status_code() -> u16 {
    429
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_anonymous() -> QuotaConfig {
    QuotaConfig {
        window_secs: default_window_secs(),
        max_requests: 20,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            status_code: default_status_code(),
            message: default_message(),
            policy: PolicyKind::default(),
            roles: HashMap::new(),
            anonymous: default_anonymous(),
            paths: Vec::new(),
        }
    }
}

fn check_quota(field: &str, window_secs: u64, max_requests: u64) -> Result<(), RateLimitConfigError> {
    if window_secs == 0 || max_requests == 0 {
        return Err(RateLimitConfigError::empty_quota(field));
    }
    Ok(())
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), RateLimitConfigError> {
        if !(400..=599).contains(&self.status_code) {
            return Err(RateLimitConfigError::InvalidStatus(self.status_code));
        }
        check_quota("max_requests", self.window_secs, self.max_requests)?;
        check_quota("anonymous", self.anonymous.window_secs, self.anonymous.max_requests)?;
        for (role, quota) in &self.roles {
            check_quota(&format!("roles.{role}"), quota.window_secs, quota.max_requests)?;
        }
        for rule in &self.paths {
            if rule.prefix.is_empty() {
                return Err(RateLimitConfigError::EmptyPrefix);
            }
            check_quota(&format!("paths.{}", rule.prefix), rule.window_secs, rule.max_requests)?;
        }
        if self.policy == PolicyKind::Path && self.paths.is_empty() {
            return Err(RateLimitConfigError::NoPathRules);
        }
        Ok(())
    }

    fn quota(&self) -> Quota {
        Quota::new(self.window_secs, self.max_requests)
    }

    pub fn policy(&self) -> Result<RateLimitPolicy, RateLimitConfigError> {
        self.validate()?;
        Ok(match self.policy {
            PolicyKind::Ip => RateLimitPolicy::ClientIp(self.quota()),
            PolicyKind::Role => RateLimitPolicy::Role {
                roles: self
                    .roles
                    .iter()
                    .map(|(role, quota)| (role.clone(), Quota::from(*quota)))
                    .collect(),
                authenticated: self.quota(),
                anonymous: self.anonymous.into(),
            },
            PolicyKind::Path => RateLimitPolicy::path_prefix(
                self.paths
                    .iter()
                    .map(|rule| PathRule::new(&rule.prefix, Quota::new(rule.window_secs, rule.max_requests)))
                    .collect(),
            ),
        })
    }

    pub fn options(&self) -> Result<RateLimitOptions, RateLimitConfigError> {
        let status = StatusCode::from_u16(self.status_code)
            .map_err(|_| RateLimitConfigError::InvalidStatus(self.status_code))?;
        Ok(RateLimitOptions::new(self.policy()?)
            .status(status)
            .message(&self.message))
    }
}
