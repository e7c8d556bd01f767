use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::identity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Fully resolved settings for one process. Built once at start-up and shared
/// read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub log: LogConfig,
    pub server: ServerConfig,
    pub consul: ConsulConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    pub dir: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: String,
    /// Domain or IP used for external access
    pub domain: String,
    /// Comma separated CORS origins, `*` for any
    pub allowed_origins: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub health_check_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsulConfig {
    pub address: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub enabled: bool,
    pub meta: ConsulMeta,
}

/// Routing and operational hints published with the registration.
#[derive(Debug, Clone, Serialize)]
pub struct ConsulMeta {
    // gateway routing
    pub route_prefix: String,
    pub strip_prefix: String,
    pub base_path: String,

    // service identification
    pub service_type: String,
    pub version: String,
    pub framework: String,
    pub language: String,

    // monitoring endpoints
    pub health_path: String,
    pub metrics_path: String,
    pub metrics_namespace: String,
    pub info_path: String,

    // load balancing
    pub weight: String,
    pub lb_policy: String,
    pub timeout_ms: String,
    pub retries: String,

    // dependencies
    pub depend_postgres: String,
    pub depend_redis: String,
    pub depend_rabbitmq: String,
    pub depend_mysql: String,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address announced to consul
    pub address: String,
    pub port: u16,
    pub scheme: String,
    /// Address consul uses to reach the health endpoint, when the public one is
    /// not routable from the agent (e.g. container-internal address)
    pub health_check_address: String,
}

/// Reads settings through a lookup function. Empty values count as unset.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn duration(&self, key: &str, default: Duration) -> Duration {
        let Some(value) = self.get(key) else {
            return default;
        };
        match humantime::parse_duration(&value) {
            Ok(duration) => duration,
            Err(e) => {
                warn!(key, value = %value, error = %e, default = ?default, "Failed to parse duration, using default");
                default
            }
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        let Some(value) = self.get(key) else {
            return default;
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                warn!(key, value = %value, default, "Failed to parse boolean, using default");
                default
            }
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::read(&EnvReader { lookup })
    }

    fn read<F: Fn(&str) -> Option<String>>(env: &EnvReader<F>) -> Self {
        Self {
            level: env.string("LOG_LEVEL", "info"),
            format: env.string("LOG_FORMAT", "json"),
            dir: env.string("LOG_DIR", "logs"),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let app_port_raw = env.string("APP_PORT", "8080");
        let app_port = app_port_raw
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "APP_PORT",
                value: app_port_raw.clone(),
                reason: e.to_string(),
            })?;

        let app = AppConfig {
            env: env.string("APP_ENV", "development"),
            port: app_port,
            name: env.string("APP_NAME", "auth-service"),
        };

        let server = ServerConfig {
            host: env.string("SERVER_HOST", "0.0.0.0"),
            port: env.string("SERVER_PORT", "8080"),
            domain: env.string("SERVER_DOMAIN", "localhost:8080"),
            allowed_origins: env.string("CORS_ALLOWED_ORIGINS", "*"),
            read_timeout: env.duration("SERVER_READ_TIMEOUT", Duration::from_secs(30)),
            write_timeout: env.duration("SERVER_WRITE_TIMEOUT", Duration::from_secs(30)),
            health_check_timeout: env.duration("HEALTH_CHECK_TIMEOUT", Duration::from_secs(10)),
        };

        let consul = ConsulConfig {
            address: env.string("CONSUL_HTTP_ADDR", "http://127.0.0.1:8500"),
            token: env.string("CONSUL_HTTP_TOKEN", ""),
            enabled: env.flag("CONSUL_ENABLED", true),
            meta: ConsulMeta {
                route_prefix: env.string("CONSUL_ROUTE_PREFIX", "/auth-service"),
                strip_prefix: env.string("CONSUL_STRIP_PREFIX", "true"),
                base_path: env.string("CONSUL_BASE_PATH", "/"),

                service_type: env.string("CONSUL_SERVICE_TYPE", "auth-service"),
                version: env.string("CONSUL_VERSION", "v1.0.0"),
                framework: env.string("CONSUL_FRAMEWORK", "axum"),
                language: env.string("CONSUL_LANGUAGE", "rust"),

                health_path: env.string("CONSUL_HEALTH_PATH", "/health"),
                metrics_path: env.string("CONSUL_METRICS_PATH", "/metrics"),
                metrics_namespace: env.string("CONSUL_METRICS_NAMESPACE", "auth_service"),
                info_path: env.string("CONSUL_INFO_PATH", "/api/v1/stats"),

                weight: env.string("CONSUL_WEIGHT", "100"),
                lb_policy: env.string("CONSUL_LB_POLICY", "weighted_round_robin"),
                timeout_ms: env.string("CONSUL_TIMEOUT_MS", "30000"),
                retries: env.string("CONSUL_RETRIES", "2"),

                depend_postgres: env.string("CONSUL_DEPEND_POSTGRES", "false"),
                depend_redis: env.string("CONSUL_DEPEND_REDIS", "false"),
                depend_rabbitmq: env.string("CONSUL_DEPEND_RABBITMQ", "false"),
                depend_mysql: env.string("CONSUL_DEPEND_MYSQL", "false"),
            },
        };

        let service = ServiceConfig {
            address: identity::resolve_address(env.get("SERVICE_ADDRESS").as_deref()),
            port: identity::resolve_port(
                env.get("SERVICE_PORT").as_deref(),
                Some(app_port_raw.as_str()),
            ),
            scheme: env.string("SERVICE_SCHEME", "http"),
            health_check_address: env.string("CONSUL_HEALTH_CHECK_ADDRESS", ""),
        };

        Ok(Self {
            app,
            log: LogConfig::read(&env),
            server,
            consul,
            service,
        })
    }

    /// Build a config from literal key/value pairs, as if they were the environment.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn is_production(&self) -> bool {
        self.app.env == "production"
    }

    pub fn is_development(&self) -> bool {
        self.app.env == "development"
    }

    pub fn is_consul_enabled(&self) -> bool {
        self.consul.enabled
    }

    /// Listen address for the HTTP server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.app.port)
    }

    pub fn service_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.service.scheme, self.service.address, self.service.port
        )
    }

    pub fn health_check_url(&self) -> String {
        format!("{}/health", self.service_url())
    }

    /// Health URL handed to consul. Prefers the dedicated health-check address.
    pub fn consul_health_check_url(&self) -> String {
        if self.service.health_check_address.is_empty() {
            return self.health_check_url();
        }
        format!(
            "{}://{}:{}/health",
            self.service.scheme, self.service.health_check_address, self.service.port
        )
    }

    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.service_url())
    }
}
