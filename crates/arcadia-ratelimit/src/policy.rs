//! Key policies: which counter a request is charged to, and with what quota.
//!
//! Policies are pure functions of the request. Returning `None` means the
//! request is not rate limited at all.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Authenticated caller, placed in request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: String,
}

impl Identity {
    pub fn new(subject: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
        }
    }
}

/// A fixed window: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub window_secs: u64,
    pub max_requests: u64,
}

impl Quota {
    pub fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window_secs,
            max_requests,
        }
    }

    pub fn per_minute(max_requests: u64) -> Self {
        Self::new(60, max_requests)
    }

    /// Quota for an arbitrary window. Counters live at second granularity,
    /// so partial seconds round up and the window is never shorter than one
    /// second.
    pub fn from_window(window: Duration, max_requests: u64) -> Self {
        let secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
        Self::new(secs.max(1), max_requests)
    }
}

/// What a policy needs to know about a request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub client_ip: Option<IpAddr>,
    pub path: String,
    pub identity: Option<Identity>,
}

impl RequestInfo {
    fn client(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Counter key plus the quota that applies to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitTarget {
    pub key: String,
    pub quota: Quota,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub prefix: String,
    pub quota: Quota,
}

impl PathRule {
    pub fn new(prefix: impl Into<String>, quota: Quota) -> Self {
        Self {
            prefix: prefix.into(),
            quota,
        }
    }
}

pub type KeyGenerator = Arc<dyn Fn(&RequestInfo) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum RateLimitPolicy {
    /// One counter per client address.
    ClientIp(Quota),
    /// One counter per authenticated subject, quota chosen by role.
    /// Unknown roles get `authenticated`, anonymous callers get `anonymous`
    /// keyed by address.
    Role {
        roles: HashMap<String, Quota>,
        authenticated: Quota,
        anonymous: Quota,
    },
    /// Per-client counter per matching path prefix. Rules are kept
    /// longest-prefix first; no match means no limit.
    PathPrefix(Vec<PathRule>),
    /// Caller-supplied key generator.
    Custom { quota: Quota, key: KeyGenerator },
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientIp(quota) => f.debug_tuple("ClientIp").field(quota).finish(),
            Self::Role {
                roles,
                authenticated,
                anonymous,
            } => f
                .debug_struct("Role")
                .field("roles", roles)
                .field("authenticated", authenticated)
                .field("anonymous", anonymous)
                .finish(),
            Self::PathPrefix(rules) => f.debug_tuple("PathPrefix").field(rules).finish(),
            Self::Custom { quota, .. } => f.debug_struct("Custom").field("quota", quota).finish_non_exhaustive(),
        }
    }
}

impl RateLimitPolicy {
    pub fn path_prefix(mut rules: Vec<PathRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self::PathPrefix(rules)
    }

    pub fn custom<F>(quota: Quota, key: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom {
            quota,
            key: Arc::new(key),
        }
    }

    pub fn resolve(&self, request: &RequestInfo) -> Option<LimitTarget> {
        match self {
            Self::ClientIp(quota) => Some(LimitTarget {
                key: format!("ip:{}", request.client()),
                quota: *quota,
            }),
            Self::Role {
                roles,
                authenticated,
                anonymous,
            } => Some(match &request.identity {
                Some(identity) => LimitTarget {
                    key: format!("user:{}", identity.subject),
                    quota: roles.get(&identity.role).copied().unwrap_or(*authenticated),
                },
                None => LimitTarget {
                    key: format!("anon:{}", request.client()),
                    quota: *anonymous,
                },
            }),
            Self::PathPrefix(rules) => rules
                .iter()
                .find(|rule| request.path.starts_with(&rule.prefix))
                .map(|rule| LimitTarget {
                    key: format!("path:{}:{}", rule.prefix, request.client()),
                    quota: rule.quota,
                }),
            Self::Custom { quota, key } => key(request).map(|key| LimitTarget { key, quota: *quota }),
        }
    }
}
