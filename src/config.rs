//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - SQLite database location
//! - Calculator tunables (phases, XP curve, referral tiers, boosts)
//! - Anti-bot and content-quality policy
//! - Optional notification webhook

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::coordinator::EngineConfig;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file for profiles, sessions and the local ledger
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/rewards.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// POST target for notifications; log-only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path, then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("REWARD_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(host) = std::env::var("REWARD_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Some(port) = std::env::var("REWARD_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("REWARD_WEBHOOK_URL") {
            self.notifications.webhook_url = (!url.is_empty()).then_some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine configuration")
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded config mirrors the built-in defaults
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            notifications: NotificationConfig::default(),
            engine: EngineConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_matches_defaults() {
        let embedded: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        embedded.validate().unwrap();
        assert_eq!(embedded.engine.mining.phases.len(), 4);
        assert_eq!(embedded.engine.mining.phases[1].base_rate, 0.05);
        assert_eq!(embedded.engine.anti_bot.thresholds.claim, 0.6);
        assert_eq!(embedded.engine.anti_bot.cache_capacity, 10_000);
        assert_eq!(embedded.engine.mining.status_cache_capacity, 10_000);
        assert_eq!(embedded.engine.quality.duplicate_score, 0.25);
        assert_eq!(embedded.engine.referral.tier_thresholds[4], 50_000.0);
        assert_eq!(embedded.engine.boosts.boosts.len(), 6);
        assert_eq!(embedded.server.port, 8080);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [mining]
            min_claim_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(partial.server.port, 9000);
        assert_eq!(partial.engine.mining.min_claim_interval_secs, 60);
        assert_eq!(partial.engine.mining.phases.len(), 4);
        assert_eq!(partial.engine.xp.activities.len(), 12);
        assert!(partial.notifications.webhook_url.is_none());
    }

    #[test]
    fn test_geometric_level_curve_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [xp.level_curve]
            policy = "geometric"
            base_xp = 100
            growth = 1.15
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(config.engine.xp.level_curve.level_for(10_000) > 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_embedded() {
        let config = Config::load_from("/nonexistent/reward-config.toml").unwrap();
        assert!(!config.database.path.is_empty());
    }
}
