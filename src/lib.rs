pub mod config;
pub mod modules;
pub mod services;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use modules::auth::{auth_routes, AuthService};
use modules::metrics::metrics_routes;
use services::jwt::TokenService;
use services::metrics::{metrics_middleware, MetricsRegistry};
use services::rate_limit::{create_rate_limiter, RateLimitLayer};
use services::security::security_headers;

pub struct AppState {
    pub auth: AuthService,
    pub tokens: Arc<TokenService>,
    pub metrics: Arc<MetricsRegistry>,
}

pub async fn create_app(
    auth: AuthService,
    tokens: Arc<TokenService>,
    metrics: Arc<MetricsRegistry>,
) -> Router {
    let state = Arc::new(AppState {
        auth,
        tokens,
        metrics: metrics.clone(),
    });

    // Global limiter; per-account throttling is the lockout counter's job.
    let rate_limiter = create_rate_limiter(300, 100);

    let api = Router::new()
        .route("/", get(root))
        .nest("/auth", auth_routes())
        .layer(middleware::from_fn_with_state(
            metrics.clone(),
            metrics_middleware,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(1024 * 100)) // 100KB max body
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Mounted outside the middleware stack so scrapes stay out of the
    // request metrics and the rate limiter.
    api.merge(metrics_routes(metrics))
}

async fn root() -> &'static str {
    "Bazaar Auth API"
}
