//! macrod
//!
//! Usage: `macrod [CONFIG_FILE]`. Without a config file the defaults are used
//! and macros are stored under `./.storage/`.

use anyhow::{Context, Result};
use macro_server::{Daemon, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => ServerConfig::default(),
    };

    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(config_dir = ?config.config_dir, "Starting macrod");

    let daemon = Daemon::new(&config);
    daemon.load().await?;

    info!("macrod is running");

    daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await
}
