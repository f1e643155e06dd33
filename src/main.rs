//! Reward Engine Server
//!
//! Serves mining, XP and referral rewards over HTTP

use std::sync::Arc;

use reward_engine::server::{build_coordinator, run_server};
use reward_engine::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Reward Engine Server");

    let config = Config::load()?;
    let coordinator = Arc::new(build_coordinator(&config)?);

    run_server(&config.server.host, config.server.port, coordinator).await?;

    Ok(())
}
