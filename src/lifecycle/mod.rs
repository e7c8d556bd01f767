//! Start-up and shutdown ordering for the service process.
//!
//! `Starting → Serving → Deregistering → Closed`. Registration failures never
//! stop the process; only a listener that cannot drain in time is fatal.


use crate::config::Config;
use crate::registry::{self, Discovery, Registrar};
use crate::{web, AppContext};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting,
    Serving,
    Deregistering,
    Closed,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("lifecycle cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("listener did not drain within {0:?}")]
    DrainTimeout(Duration),

    #[error("listener failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Process-wide lifecycle state. Only ever moves forward.
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self { state }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn advance(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if next > *current {
                info!(from = ?*current, to = ?next, "Lifecycle transition");
                *current = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleTimeouts {
    /// Upper bound for the start-up registration
    pub register: Duration,
    /// Shared budget for deregistration and draining
    pub shutdown: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            register: Duration::from_secs(10),
            shutdown: Duration::from_secs(5),
        }
    }
}

/// Drives one process instance from registration to clean exit.
pub struct ServiceRunner {
    config: Arc<Config>,
    discovery: Discovery,
    timeouts: LifecycleTimeouts,
    lifecycle: Lifecycle,
}

impl ServiceRunner {
    pub fn new(config: Arc<Config>, discovery: Discovery) -> Self {
        Self {
            config,
            discovery,
            timeouts: LifecycleTimeouts::default(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: LifecycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Register, serve on `listener` until `shutdown` resolves, then deregister
    /// and drain under a single deadline.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), LifecycleError>
    where
        S: Future<Output = ()> + Send,
    {
        let registered = self.announce().await;

        let ctx = Arc::new(AppContext {
            config: Arc::clone(&self.config),
            discovery: self.discovery.clone(),
            lifecycle: self.lifecycle.subscribe(),
        });
        let app = web::router(ctx);

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        self.lifecycle.advance(LifecycleState::Serving)?;
        info!(
            url = %self.config.service_url(),
            health = %self.config.health_check_url(),
            metrics = %self.config.metrics_url(),
            env = %self.config.app.env,
            version = %self.config.consul.meta.version,
            "Service is serving"
        );

        let stopped_early = tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received");
                None
            }
            result = &mut server => Some(result),
        };

        self.lifecycle.advance(LifecycleState::Deregistering)?;
        let deadline = Instant::now() + self.timeouts.shutdown;

        if let Some(registrar) = registered {
            self.withdraw(registrar.as_ref(), deadline).await;
        }

        let outcome = match stopped_early {
            Some(result) => {
                error!("Listener stopped before shutdown was requested");
                flatten(result)
            }
            None => {
                let _ = drain_tx.send(());
                match tokio::time::timeout_at(deadline, &mut server).await {
                    Ok(result) => flatten(result),
                    Err(_) => {
                        server.abort();
                        Err(LifecycleError::DrainTimeout(self.timeouts.shutdown))
                    }
                }
            }
        };

        self.lifecycle.advance(LifecycleState::Closed)?;
        outcome
    }

    /// Attempt the start-up registration. Returns the registrar only if the
    /// instance is now registered.
    async fn announce(&self) -> Option<Arc<dyn Registrar>> {
        let registrar = match &self.discovery {
            Discovery::Disabled => return None,
            Discovery::Unavailable(reason) => {
                warn!(%reason, "Consul client unavailable, serving unregistered");
                return None;
            }
            Discovery::Enabled(registrar) => Arc::clone(registrar),
        };

        if let Err(e) = registry::validate(&self.config) {
            warn!(error = %e, "Consul config validation failed, serving unregistered");
            return None;
        }

        info!(service_id = registrar.identity(), "Registering service to consul");
        let deadline = Instant::now() + self.timeouts.register;
        match registry::within("register", deadline, registrar.register()).await {
            Ok(()) => Some(registrar),
            Err(e) => {
                error!(
                    service_id = registrar.identity(),
                    consul_address = %self.config.consul.address,
                    error = %e,
                    "Failed to register service to consul, serving unregistered"
                );
                None
            }
        }
    }

    async fn withdraw(&self, registrar: &dyn Registrar, deadline: Instant) {
        info!(service_id = registrar.identity(), "Deregistering service from consul");
        if let Err(e) = registry::within("deregister", deadline, registrar.deregister()).await {
            error!(
                service_id = registrar.identity(),
                consul_address = %self.config.consul.address,
                error = %e,
                "Failed to deregister service from consul"
            );
        }
    }
}

fn flatten(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), LifecycleError> {
    result?.map_err(LifecycleError::Serve)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
