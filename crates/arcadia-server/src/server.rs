use std::net::SocketAddr;

use anyhow::Context;
use arcadia_cache::FailoverCache;
use arcadia_ratelimit::{RateLimitConfigError, RateLimitState, RateLimiter, rate_limit_middleware};
use axum::{
    Router, middleware,
    routing::{delete, get},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers};

/// Shared handles given to every handler. Both point at the same cache.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: FailoverCache,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(cache: FailoverCache) -> Self {
        let limiter = RateLimiter::new(cache.clone());
        Self { cache, limiter }
    }
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Result<Router, RateLimitConfigError> {
    let mut api = Router::new()
        .route("/cache/status", get(handlers::cache_status))
        .route("/cache", delete(handlers::invalidate_cache));

    if cfg.rate_limit.enabled {
        let rate_limit = RateLimitState::new(state.limiter.clone(), cfg.rate_limit.options()?);
        api = api.layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware));
    }

    Ok(Router::new()
        // Health endpoints are never rate limited
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .nest("/api", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes)))
}

pub struct ArcadiaServer {
    addr: SocketAddr,
    app: Router,
    cache: FailoverCache,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Construct the cache (starting its background tasks) and the router.
    pub async fn build(self) -> anyhow::Result<ArcadiaServer> {
        let cache = FailoverCache::builder()
            .with_config(self.config.cache.clone())
            .with_redis(self.config.redis.clone())
            .build()
            .context("failed to initialize cache")?;

        let app = build_app(&self.config, AppState::new(cache.clone()))
            .context("invalid rate limit configuration")?;

        Ok(ArcadiaServer {
            addr: self.addr,
            app,
            cache,
        })
    }
}

impl ArcadiaServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        self.cache.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
