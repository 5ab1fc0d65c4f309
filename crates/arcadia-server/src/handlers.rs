use arcadia_cache::{CacheError, CacheMode, CacheStats};
use arcadia_ratelimit::KEY_PREFIX;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    cache: CacheStats,
}

/// Errors returned by the admin endpoints.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "code": "INVALID_REQUEST", "message": message } })),
            )
                .into_response(),
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Always ready: the fallback keeps serving while Redis is away, but the
/// body says so.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.stats();
    let status = match cache.mode {
        CacheMode::Networked | CacheMode::LocalOnly => "ready",
        CacheMode::Fallback | CacheMode::Recovering => "degraded",
    };
    (StatusCode::OK, Json(ReadinessResponse { status, cache }))
}

pub async fn cache_status(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

#[derive(Debug, Deserialize)]
pub struct InvalidateParams {
    pub key: Option<String>,
    pub prefix: Option<String>,
}

/// Rate limiter counters are not for clients to reset.
fn reject_counter_target(target: &str) -> Result<(), ApiError> {
    if KEY_PREFIX.starts_with(target) || target.starts_with(KEY_PREFIX) {
        return Err(ApiError::BadRequest(format!(
            "keys under `{KEY_PREFIX}` cannot be invalidated"
        )));
    }
    Ok(())
}

/// `DELETE /api/cache?key=...` or `DELETE /api/cache?prefix=...`
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(target) = params.key.as_deref().or(params.prefix.as_deref()) {
        if !target.is_empty() {
            reject_counter_target(target)?;
        }
    }
    match (params.key, params.prefix) {
        (Some(key), None) => {
            state.cache.delete(&key).await?;
            tracing::info!(key = %key, "Cache key invalidated");
            Ok(Json(json!({ "key": key })))
        }
        (None, Some(prefix)) => {
            let removed = state.cache.delete_by_prefix(&prefix).await?;
            tracing::info!(prefix = %prefix, removed, "Cache prefix invalidated");
            Ok(Json(json!({ "prefix": prefix, "removed": removed })))
        }
        _ => Err(ApiError::BadRequest(
            "exactly one of `key` or `prefix` is required".into(),
        )),
    }
}
