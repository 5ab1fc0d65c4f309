use arcadia_cache::FailoverCache;
use arcadia_server::{AppConfig, AppState, build_app};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt; // for `oneshot`

fn app_with(cfg: AppConfig) -> (Router, FailoverCache) {
    let cache = FailoverCache::local().expect("cache");
    let app = build_app(&cfg, AppState::new(cache.clone())).expect("router");
    (app, cache)
}

async fn call(app: &Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.8")
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn health_endpoints_report_cache_mode() {
    let (app, _) = app_with(AppConfig::default());

    let health = call(&app, Method::GET, "/healthz").await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await, json!({"status": "ok"}));

    let ready = json_body(call(&app, Method::GET, "/readyz").await).await;
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["cache"]["mode"], "local_only");
    assert_eq!(ready["cache"]["connection"], Value::Null);
}

#[tokio::test]
async fn invalidation_endpoint_removes_entries() {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.enabled = false;
    let (app, cache) = app_with(cfg);
    cache.set("games:list:1", &json!([1]), 60).await.unwrap();
    cache.set("games:list:2", &json!([2]), 60).await.unwrap();
    cache.set("games:detail:9", &json!({"id": 9}), 60).await.unwrap();

    let response = call(&app, Method::DELETE, "/api/cache?prefix=games:list:").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["removed"], 2);

    let response = call(&app, Method::DELETE, "/api/cache?key=games:detail:9").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cache.get("games:detail:9").await.unwrap(), None);

    let status = json_body(call(&app, Method::GET, "/api/cache/status").await).await;
    assert_eq!(status["fallback_entries"], 0);
}

#[tokio::test]
async fn invalidation_requires_exactly_one_target() {
    let (app, _) = app_with(AppConfig::default());

    let response = call(&app, Method::DELETE, "/api/cache").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_REQUEST");

    let response = call(&app, Method::DELETE, "/api/cache?key=").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalidation_cannot_reset_rate_limit_counters() {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.max_requests = 4;
    let (app, _) = app_with(cfg);

    for target in [
        "prefix=rate-limit:",
        "prefix=r",
        "prefix=rate-limit:ip:",
        "key=rate-limit:ip:203.0.113.8",
    ] {
        let response = call(&app, Method::DELETE, &format!("/api/cache?{target}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{target}");
        assert_eq!(json_body(response).await["error"]["code"], "INVALID_REQUEST");
    }

    // Rejected invalidations still count against the quota.
    let rejected = call(&app, Method::GET, "/api/cache/status").await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn api_is_rate_limited_but_health_is_not() {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.max_requests = 2;
    let (app, _) = app_with(cfg);

    for _ in 0..2 {
        let response = call(&app, Method::GET, "/api/cache/status").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
    }
    let rejected = call(&app, Method::GET, "/api/cache/status").await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().contains_key("retry-after"));

    for _ in 0..5 {
        assert_eq!(call(&app, Method::GET, "/healthz").await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn disabled_rate_limit_adds_no_headers() {
    let mut cfg = AppConfig::default();
    cfg.rate_limit.enabled = false;
    cfg.rate_limit.max_requests = 1;
    let (app, _) = app_with(cfg);

    for _ in 0..3 {
        let response = call(&app, Method::GET, "/api/cache/status").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}
