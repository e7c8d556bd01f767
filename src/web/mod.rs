pub mod handlers;
pub mod middleware;

#[cfg(test)]
mod tests;

use crate::AppContext;
use axum::Router;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;

/// Full HTTP surface: monitoring endpoints at the root, service APIs under `/api/v1`.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let server = &ctx.config.server;
    let timeout = TimeoutLayer::new(server.write_timeout);
    let cors = middleware::cors_layer(&server.allowed_origins);

    Router::new()
        .merge(handlers::health::health_router(ctx.clone()))
        .nest("/api/v1", handlers::service::api_router(ctx.clone()))
        .layer(timeout)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::log_request))
}
