pub mod consul;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::{Config, ConsulMeta};

pub use consul::ConsulRegistry;

pub const CHECK_INTERVAL: &str = "10s";
pub const CHECK_TIMEOUT: &str = "5s";
pub const DEREGISTER_CRITICAL_AFTER: &str = "60s";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("consul integration is disabled")]
    Disabled,

    #[error("invalid registration config: {0}")]
    InvalidConfig(String),

    #[error("failed to build consul client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("consul request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("consul rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("service {0} is not registered")]
    NotRegistered(String),

    #[error("service {0} not found in consul")]
    NotFound(String),

    #[error("{0} did not complete before its deadline")]
    DeadlineExceeded(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Deregistered,
}

/// HTTP check consul runs against this instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: String,
}

/// Payload of `PUT /v1/agent/service/register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistrationRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub check: HealthCheck,
}

/// Consul's view of a registered service, as returned by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
}

/// Something that can announce this instance to a discovery backend,
/// withdraw it, and report whether the backend is reachable.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Key used for every backend operation
    fn identity(&self) -> &str;

    async fn state(&self) -> RegistrationState;

    /// Submit a freshly built registration. State is unchanged on failure.
    async fn register(&self) -> Result<(), RegistryError>;

    /// Remove the registration. Only valid once registered.
    async fn deregister(&self) -> Result<(), RegistryError>;

    /// Backend liveness. Never fails, problems are logged and reported as `false`.
    async fn is_healthy(&self) -> bool;

    /// Backend's current record for this identity
    async fn lookup(&self) -> Result<AgentService, RegistryError>;
}

/// Discovery integration as seen by the rest of the process.
#[derive(Clone)]
pub enum Discovery {
    Disabled,
    /// Enabled, but no client could be built. Holds the reason.
    Unavailable(String),
    Enabled(Arc<dyn Registrar>),
}

impl Discovery {
    pub fn registrar(&self) -> Option<&Arc<dyn Registrar>> {
        match self {
            Discovery::Enabled(registrar) => Some(registrar),
            _ => None,
        }
    }
}

/// Build the consul integration for `config`. Client construction failures
/// degrade to [`Discovery::Unavailable`] instead of stopping the process.
pub fn connect(config: &Arc<Config>) -> Discovery {
    if !config.is_consul_enabled() {
        info!("Consul service discovery is disabled");
        return Discovery::Disabled;
    }

    match ConsulRegistry::new(Arc::clone(config)) {
        Ok(registry) => Discovery::Enabled(Arc::new(registry)),
        Err(e) => {
            error!(consul_address = %config.consul.address, error = %e, "Failed to create consul registry");
            Discovery::Unavailable(e.to_string())
        }
    }
}

/// Check that `config` can produce a valid registration.
pub fn validate(config: &Config) -> Result<(), RegistryError> {
    if !config.is_consul_enabled() {
        return Err(RegistryError::Disabled);
    }
    if config.consul.address.is_empty() {
        return Err(RegistryError::InvalidConfig(
            "consul address must not be empty".to_string(),
        ));
    }
    if config.service.address.is_empty() {
        return Err(RegistryError::InvalidConfig(
            "service address must not be empty".to_string(),
        ));
    }
    if config.service.port == 0 {
        return Err(RegistryError::InvalidConfig(format!(
            "invalid service port: {}",
            config.service.port
        )));
    }
    if config.service.scheme != "http" && config.service.scheme != "https" {
        return Err(RegistryError::InvalidConfig(format!(
            "service scheme must be http or https: {}",
            config.service.scheme
        )));
    }
    Ok(())
}

/// Build the registration payload for `identity` from the current config.
pub fn build_record(config: &Config, identity: &str) -> RegistrationRecord {
    let meta = &config.consul.meta;

    RegistrationRecord {
        id: identity.to_string(),
        name: config.app.name.clone(),
        address: config.service.address.clone(),
        port: config.service.port,
        tags: vec![
            "microservice".to_string(),
            meta.service_type.clone(),
            meta.framework.clone(),
        ],
        meta: registration_meta(config),
        check: HealthCheck {
            http: config.consul_health_check_url(),
            interval: CHECK_INTERVAL.to_string(),
            timeout: CHECK_TIMEOUT.to_string(),
            deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER.to_string(),
        },
    }
}

fn registration_meta(config: &Config) -> HashMap<String, String> {
    let ConsulMeta {
        route_prefix,
        strip_prefix,
        base_path,
        service_type,
        version,
        framework,
        language,
        health_path,
        metrics_path,
        metrics_namespace,
        info_path,
        weight,
        lb_policy,
        timeout_ms,
        retries,
        depend_postgres,
        depend_redis,
        depend_rabbitmq,
        depend_mysql,
    } = &config.consul.meta;

    [
        ("route_prefixes", route_prefix),
        ("strip_prefix", strip_prefix),
        ("base_path", base_path),
        ("service_type", service_type),
        ("version", version),
        ("framework", framework),
        ("language", language),
        ("health_path", health_path),
        ("metrics_path", metrics_path),
        ("metrics_namespace", metrics_namespace),
        ("info_path", info_path),
        ("weight", weight),
        ("lb_policy", lb_policy),
        ("timeout_ms", timeout_ms),
        ("retries", retries),
        ("depend_postgres", depend_postgres),
        ("depend_redis", depend_redis),
        ("depend_rabbitmq", depend_rabbitmq),
        ("depend_mysql", depend_mysql),
        ("environment", &config.app.env),
        ("scheme", &config.service.scheme),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.clone()))
    .collect()
}

/// Run a registry operation, giving up at `deadline`.
pub async fn within<T, F>(operation: &'static str, deadline: Instant, fut: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::DeadlineExceeded(operation)),
    }
}

/// Connection snapshot served by the consul info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConsulInfo {
    pub address: String,
    pub enabled: bool,
    pub service_id: String,
    pub service: ServiceSummary,
    pub endpoints: Endpoints,
    pub meta: ConsulMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub scheme: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoints {
    pub health: String,
    pub metrics: String,
}

impl ConsulInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            address: config.consul.address.clone(),
            enabled: config.consul.enabled,
            service_id: crate::identity::generate_identity(
                &config.app.name,
                &config.service.address,
                config.service.port,
            ),
            service: ServiceSummary {
                name: config.app.name.clone(),
                address: config.service.address.clone(),
                port: config.service.port,
                scheme: config.service.scheme.clone(),
            },
            endpoints: Endpoints {
                health: config.health_check_url(),
                metrics: config.metrics_url(),
            },
            meta: config.consul.meta.clone(),
        }
    }
}
