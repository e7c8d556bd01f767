use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json,
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::lifecycle::LifecycleState;
use crate::registry::{ConsulInfo, Discovery, RegistryError};
use crate::utils::http::HttpResponse;
use crate::AppContext;

pub fn api_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/consul/info", get(consul_info))
        .route("/consul/service", get(consul_service))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct ServiceStats {
    pub service_name: String,
    pub version: String,
    pub environment: String,
    pub start_time: i64,
    pub state: LifecycleState,
    pub git_hash: &'static str,
}

pub async fn stats(State(ctx): State<Arc<AppContext>>) -> Json<ServiceStats> {
    let state = *ctx.lifecycle.borrow();
    Json(ServiceStats {
        service_name: ctx.config.app.name.clone(),
        version: ctx.config.consul.meta.version.clone(),
        environment: ctx.config.app.env.clone(),
        start_time: Utc::now().timestamp(),
        state,
        git_hash: env!("GIT_HASH"),
    })
}

pub async fn consul_info(State(ctx): State<Arc<AppContext>>) -> Json<ConsulInfo> {
    Json(ConsulInfo::from_config(&ctx.config))
}

/// Consul's current record for this instance.
pub async fn consul_service(State(ctx): State<Arc<AppContext>>) -> Response {
    let registrar = match &ctx.discovery {
        Discovery::Disabled => {
            return HttpResponse::error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Consul integration is disabled",
            )
            .into_response();
        }
        Discovery::Unavailable(reason) => {
            return HttpResponse::error(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Consul client unavailable: {}", reason),
            )
            .into_response();
        }
        Discovery::Enabled(registrar) => registrar,
    };

    match registrar.lookup().await {
        Ok(service) => {
            HttpResponse::new(200, "Service found".to_string(), service).into_response()
        }
        Err(e @ RegistryError::NotFound(_)) => {
            HttpResponse::error(StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            warn!(service_id = registrar.identity(), error = %e, "Failed to look up service in consul");
            HttpResponse::error(StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}
