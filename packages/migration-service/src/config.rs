use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub api_url: String,
    pub poll_interval: Duration,
    pub max_concurrent_executions: usize,
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from a variable lookup.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_concurrent_executions: usize = var("MIGRATOR_MAX_CONCURRENT_EXECUTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("MIGRATOR_MAX_CONCURRENT_EXECUTIONS must be a valid number")?;
        ensure!(
            max_concurrent_executions > 0,
            "MIGRATOR_MAX_CONCURRENT_EXECUTIONS must be at least 1"
        );

        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            api_url: var("API_URL").unwrap_or_else(|| "http://localhost:30100".to_string()),
            poll_interval: Duration::from_millis(
                var("MIGRATOR_POLL_INTERVAL_MS")
                    .unwrap_or_else(|| "1000".to_string())
                    .parse()
                    .context("MIGRATOR_POLL_INTERVAL_MS must be a valid number")?,
            ),
            max_concurrent_executions,
            shutdown_timeout: Duration::from_secs(
                var("SHUTDOWN_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("SHUTDOWN_TIMEOUT_SECS must be a valid number")?,
            ),
        })
    }
}
