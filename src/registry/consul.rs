use super::{build_record, validate, AgentService, RegistrationState, Registrar, RegistryError};
use crate::config::Config;
use crate::identity::generate_identity;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Status reported through a TTL check update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TtlUpdate<'a> {
    status: CheckStatus,
    output: &'a str,
}

/// Registrar backed by the consul agent HTTP API.
#[derive(Clone)]
pub struct ConsulRegistry {
    client: Client,
    config: Arc<Config>,
    base_url: String,
    service_id: String,
    state: Arc<Mutex<RegistrationState>>,
}

impl ConsulRegistry {
    pub fn new(config: Arc<Config>) -> Result<Self, RegistryError> {
        let mut headers = HeaderMap::new();
        if !config.consul.token.is_empty() {
            let token = HeaderValue::from_str(&config.consul.token).map_err(|_| {
                RegistryError::InvalidConfig("consul token is not a valid header value".to_string())
            })?;
            headers.insert(TOKEN_HEADER, token);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.server.health_check_timeout)
            .build()
            .map_err(RegistryError::Client)?;

        let service_id = generate_identity(
            &config.app.name,
            &config.service.address,
            config.service.port,
        );

        Ok(Self {
            client,
            base_url: agent_base_url(&config.consul.address),
            config,
            service_id,
            state: Arc::new(Mutex::new(RegistrationState::Unregistered)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Push a status to the service's TTL check (`service:{id}`).
    pub async fn update_ttl(&self, status: CheckStatus, output: &str) -> Result<(), RegistryError> {
        let url = self.url(&format!("/v1/agent/check/update/service:{}", self.service_id));
        let response = self
            .client
            .put(url)
            .json(&TtlUpdate { status, output })
            .send()
            .await?;
        ensure_success("update_ttl", response).await?;
        Ok(())
    }
}

/// Consul accepts addresses with or without a scheme; default to http.
fn agent_base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

async fn ensure_success(operation: &'static str, response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Rejected {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Registrar for ConsulRegistry {
    fn identity(&self) -> &str {
        &self.service_id
    }

    async fn state(&self) -> RegistrationState {
        *self.state.lock().await
    }

    async fn register(&self) -> Result<(), RegistryError> {
        validate(&self.config)?;

        let record = build_record(&self.config, &self.service_id);
        let response = self
            .client
            .put(self.url("/v1/agent/service/register"))
            .json(&record)
            .send()
            .await?;
        ensure_success("register", response).await?;

        *self.state.lock().await = RegistrationState::Registered;
        info!(
            service_id = %self.service_id,
            service_name = %self.config.app.name,
            service_address = %self.config.service.address,
            service_port = self.config.service.port,
            consul_address = %self.config.consul.address,
            health_check = %record.check.http,
            "Registered service to consul"
        );
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        if *state != RegistrationState::Registered {
            return Err(RegistryError::NotRegistered(self.service_id.clone()));
        }

        let url = self.url(&format!("/v1/agent/service/deregister/{}", self.service_id));
        let response = self.client.put(url).send().await?;
        ensure_success("deregister", response).await?;

        *state = RegistrationState::Deregistered;
        info!(
            service_id = %self.service_id,
            service_name = %self.config.app.name,
            "Deregistered service from consul"
        );
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let leader = async {
            let response = self.client.get(self.url("/v1/status/leader")).send().await?;
            let leader: String = ensure_success("leader", response).await?.json().await?;
            Ok::<_, RegistryError>(leader)
        };

        match leader.await {
            Ok(leader) if !leader.is_empty() => true,
            Ok(_) => {
                warn!(consul_address = %self.config.consul.address, "Consul reports no cluster leader");
                false
            }
            Err(e) => {
                warn!(consul_address = %self.config.consul.address, error = %e, "Consul health check failed");
                false
            }
        }
    }

    async fn lookup(&self) -> Result<AgentService, RegistryError> {
        let url = self.url(&format!("/v1/agent/service/{}", self.service_id));
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(self.service_id.clone()));
        }
        let service = ensure_success("lookup", response).await?.json().await?;
        Ok(service)
    }
}
