//! Configuration for bank-service.

use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct BankConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl BankConfig {
    /// Load configuration from the shared config sources plus `BANK_*`
    /// environment variables. The database URL has no default and must be
    /// provided.
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(BankConfig {
            common,
            service_name: env::var("BANK_SERVICE_NAME")
                .unwrap_or_else(|_| "bank-service".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: env::var("BANK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("BANK_OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: require_env("BANK_DATABASE_URL")?,
                max_connections: parse_env("BANK_DB_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("BANK_DB_MIN_CONNECTIONS", 1)?,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String, AppError> {
    env::var(key)
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key)))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} must be a valid number", key))),
        Err(_) => Ok(default),
    }
}
