use anyhow::{Context, Result};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::web::middleware::HTTP_TARGET;

/// Keeps the file writers flushing. Hold it for the lifetime of the process.
pub struct LogGuards {
    _app: WorkerGuard,
    _http: WorkerGuard,
}

/// Console output plus `app.log` and `http.log` under `config.dir`.
/// Request logs (the `http` target) go to `http.log` only; `RUST_LOG`
/// overrides the configured level.
pub fn init(config: &LogConfig) -> Result<LogGuards> {
    fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create log directory {}", config.dir))?;

    let (app_writer, app_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&config.dir, "app.log"));
    let (http_writer, http_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&config.dir, "http.log"));

    let level = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let json_console = config.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(level)
        .with(json_console.then(|| fmt::layer().json()))
        .with((!json_console).then(fmt::layer))
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(app_writer)
                .with_filter(filter::filter_fn(|meta| meta.target() != HTTP_TARGET)),
        )
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(http_writer)
                .with_filter(filter::filter_fn(|meta| meta.target() == HTTP_TARGET)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuards {
        _app: app_guard,
        _http: http_guard,
    })
}
