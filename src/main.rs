#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::Parser;
use consul_service::{
    config::{Config, LogConfig},
    init_env,
    lifecycle::{shutdown_signal, ServiceRunner},
    registry,
    utils::logger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Service skeleton that registers itself with consul")]
struct Cli {
    /// Dotenv file to load instead of the APP_ENV based default
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize environment
    let env_file = init_env(cli.env_file.as_deref());

    // Initialize logging system
    let _guards = logger::init(&LogConfig::from_env())?;
    match env_file {
        Some(path) => info!(path = %path.display(), "Loaded environment file"),
        None => warn!("No environment file loaded, using process environment"),
    }

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    info!(
        name = %config.app.name,
        env = %config.app.env,
        production = config.is_production(),
        service_address = %config.service.address,
        service_port = config.service.port,
        "Configuration loaded"
    );

    let discovery = registry::connect(&config);

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, domain = %config.server.domain, "Listening");

    ServiceRunner::new(Arc::clone(&config), discovery)
        .run(listener, shutdown_signal())
        .await?;

    info!("Service shut down cleanly");
    Ok(())
}
