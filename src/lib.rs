pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod utils;
pub mod web;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::lifecycle::LifecycleState;
use crate::registry::Discovery;

/// Shared state handed to every HTTP handler.
pub struct AppContext {
    pub config: Arc<Config>,
    pub discovery: Discovery,
    pub lifecycle: watch::Receiver<LifecycleState>,
}

/// Load a dotenv file into the process environment.
///
/// An explicit file wins. Otherwise `.env.production` is used when
/// `APP_ENV=production` and `.env.dev` for anything else, falling back to `.env`.
/// Returns the file that was loaded, if any.
pub fn init_env(env_file: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = env_file {
        return dotenv::from_path(path).ok().map(|_| path.to_path_buf());
    }

    let candidate = match std::env::var("APP_ENV").as_deref() {
        Ok("production") => ".env.production",
        _ => ".env.dev",
    };

    dotenv::from_filename(candidate)
        .or_else(|_| dotenv::dotenv())
        .ok()
}
