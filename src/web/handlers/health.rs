use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json,
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::registry::Discovery;
use crate::AppContext;

pub fn health_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: i64,
    pub service: ServiceTag,
    pub dependencies: BTreeMap<&'static str, DependencyStatus>,
}

#[derive(Debug, Serialize)]
pub struct ServiceTag {
    pub name: String,
    pub version: String,
    pub env: String,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness of this service plus the state of its dependencies. Always 200:
/// an impaired dependency is reported inside the body, never as a failure.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthStatus> {
    let config = &ctx.config;
    let mut dependencies = BTreeMap::new();

    match &ctx.discovery {
        Discovery::Disabled => {}
        Discovery::Unavailable(reason) => {
            dependencies.insert(
                "consul",
                DependencyStatus {
                    status: "unhealthy",
                    address: None,
                    error: Some(reason.clone()),
                },
            );
        }
        Discovery::Enabled(registrar) => {
            let status = if registrar.is_healthy().await {
                "healthy"
            } else {
                "unhealthy"
            };
            dependencies.insert(
                "consul",
                DependencyStatus {
                    status,
                    address: Some(config.consul.address.clone()),
                    error: None,
                },
            );
        }
    }

    Json(HealthStatus {
        status: "healthy",
        message: "Service is running normally",
        timestamp: Utc::now().timestamp(),
        service: ServiceTag {
            name: config.app.name.clone(),
            version: config.consul.meta.version.clone(),
            env: config.app.env.clone(),
        },
        dependencies,
    })
}

#[derive(Debug, Serialize)]
pub struct Pong {
    pub message: &'static str,
    pub status: &'static str,
    pub timestamp: i64,
}

pub async fn ping() -> Json<Pong> {
    Json(Pong {
        message: "pong",
        status: "success",
        timestamp: Utc::now().timestamp(),
    })
}

/// Prometheus text exposition. `service_uptime_seconds` carries the current
/// unix time, not the elapsed uptime.
pub async fn metrics(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let config = &ctx.config;
    let meta = &config.consul.meta;
    let namespace = &meta.metrics_namespace;

    let body = format!(
        "# HELP {namespace}_info Service information\n\
         # TYPE {namespace}_info gauge\n\
         {namespace}_info{{name=\"{}\",version=\"{}\",framework=\"{}\",language=\"{}\",environment=\"{}\"}} 1\n\
         \n\
         # HELP service_uptime_seconds Service uptime in seconds\n\
         # TYPE service_uptime_seconds gauge\n\
         service_uptime_seconds {}\n",
        config.app.name,
        meta.version,
        meta.framework,
        meta.language,
        config.app.env,
        Utc::now().timestamp(),
    );

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
