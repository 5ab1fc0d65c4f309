//! Rate limiting middleware for axum.
//!
//! ```ignore
//! let state = RateLimitState::new(limiter, RateLimitOptions::new(policy));
//! let app = Router::new()
//!     .route("/api/games", get(list_games))
//!     .layer(middleware::from_fn_with_state(state, rate_limit_middleware));
//! ```
//!
//! Allowed responses carry `x-ratelimit-limit`, `x-ratelimit-remaining` and
//! `x-ratelimit-reset`. Rejections use the configured status (429 by default)
//! with a `retry-after` header and a JSON error body.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{ConnectInfo, OriginalUri, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::policy::{Identity, Quota, RateLimitPolicy, RequestInfo};

pub const RATE_LIMITED_CODE: &str = "RATE_LIMITED";
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub policy: RateLimitPolicy,
    pub status: StatusCode,
    pub message: String,
}

impl RateLimitOptions {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            status: StatusCode::TOO_MANY_REQUESTS,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    /// Single window with a caller-supplied key generator.
    pub fn with_key_generator<F>(window: Duration, max_requests: u64, key: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(RateLimitPolicy::custom(Quota::from_window(window, max_requests), key))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// State for rate limiting middleware.
#[derive(Clone, Debug)]
pub struct RateLimitState {
    limiter: RateLimiter,
    options: Arc<RateLimitOptions>,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, options: RateLimitOptions) -> Self {
        Self {
            limiter,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &RateLimitOptions {
        &self.options
    }
}

/// Rejection returned when a request is over its quota.
#[derive(Debug)]
pub struct RateLimited {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: u64,
    pub decision: RateLimitDecision,
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": RATE_LIMITED_CODE,
                "message": self.message,
                "retryAfter": self.retry_after,
            }
        });

        let mut response = (self.status, Json(body)).into_response();
        let headers = response.headers_mut();
        insert_quota_headers(headers, &self.decision);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(self.retry_after));
        response
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(decision.reset_unix_secs()),
    );
}

/// Extract client IP from request, considering proxy headers.
pub fn extract_client_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();

    // X-Forwarded-For can contain multiple IPs, take the first one
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
    {
        return Some(ip);
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(ip);
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Rate limiting middleware.
///
/// Requests the policy does not cover pass through untouched.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    // Nested routers see a stripped URI; match policies on the full path.
    let path = match request.extensions().get::<OriginalUri>() {
        Some(OriginalUri(uri)) => uri.path().to_string(),
        None => request.uri().path().to_string(),
    };
    let info = RequestInfo {
        client_ip: extract_client_ip(&request),
        path,
        identity: request.extensions().get::<Identity>().cloned(),
    };

    let Some(target) = state.options.policy.resolve(&info) else {
        return next.run(request).await;
    };

    let decision = state
        .limiter
        .check_and_increment(&target.key, target.quota.window_secs, target.quota.max_requests)
        .await;

    if !decision.allowed {
        let retry_after = decision.retry_after_secs(state.limiter.clock().now());
        tracing::info!(
            key = %target.key,
            path = %info.path,
            retry_after,
            "Request rate limited"
        );
        return RateLimited {
            status: state.options.status,
            message: state.options.message.clone(),
            retry_after,
            decision,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    insert_quota_headers(response.headers_mut(), &decision);
    response
}
