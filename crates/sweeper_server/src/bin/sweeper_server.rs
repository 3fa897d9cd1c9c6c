//! SWEEPER leaderboard server.
//!
//! Run with:
//! ```bash
//! SWEEPER_CONFIG=sweeper.toml SWEEPER_BIND=0.0.0.0:8787 cargo run --release -p sweeper_server
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sweeper_core::config::{DEFAULT_CONFIG_PATH, ENV_CONFIG};
use sweeper_core::{HealthStatus, SweeperConfig};
use sweeper_server::SubmissionOrchestrator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = env::var(ENV_CONFIG).map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let mut config = SweeperConfig::load(&path)?;
    config.apply_overrides(|key| env::var(key).ok());
    info!(config = %path.display(), database = %config.server.database, "Configuration loaded");

    let orchestrator = Arc::new(SubmissionOrchestrator::open(&config)?);
    let health = orchestrator.health(Utc::now())?;
    match health.status {
        HealthStatus::Optimal => info!(tables = ?health.tables, "Store healthy"),
        HealthStatus::NeedsAttention => {
            warn!(tables = ?health.tables, recommendations = ?health.recommendations, "Store needs attention");
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "Leaderboard listening");

    sweeper_server::serve(listener, orchestrator, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
    })
    .await?;
    Ok(())
}
