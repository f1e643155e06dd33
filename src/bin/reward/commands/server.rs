//! Server command - run the HTTP API in the foreground

use anyhow::Result;
use reward_engine::server::{build_coordinator, run_server};
use reward_engine::Config;
use std::sync::Arc;

use crate::style::*;

pub async fn run(config_path: &str, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load_from(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let coordinator = Arc::new(build_coordinator(&config)?);

    print_success(&format!(
        "Listening on {}",
        style_cyan(&format!("{}:{}", config.server.host, config.server.port))
    ));
    println!("  Database: {}", style_dim(&config.database.path));
    println!();

    run_server(&config.server.host, config.server.port, coordinator).await
}
