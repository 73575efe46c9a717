//! Configuration module for fee-ledger-service.

use crate::services::reconcile::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct FeeLedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Records per reconciliation batch when a caller does not choose one.
    pub batch_size: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReconcileConfig {
    fn from_env() -> Self {
        let batch_size = env::var("RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .map(|n| n.min(MAX_BATCH_SIZE))
            .unwrap_or(DEFAULT_BATCH_SIZE);

        Self { batch_size }
    }
}

impl FeeLedgerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "fee-ledger-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            reconcile: ReconcileConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn reconcile_batch_size_defaults_when_unset_or_invalid() {
        env::remove_var("RECONCILE_BATCH_SIZE");
        assert_eq!(ReconcileConfig::from_env().batch_size, DEFAULT_BATCH_SIZE);

        env::set_var("RECONCILE_BATCH_SIZE", "zero");
        assert_eq!(ReconcileConfig::from_env().batch_size, DEFAULT_BATCH_SIZE);

        env::set_var("RECONCILE_BATCH_SIZE", "-4");
        assert_eq!(ReconcileConfig::from_env().batch_size, DEFAULT_BATCH_SIZE);

        env::remove_var("RECONCILE_BATCH_SIZE");
    }

    #[test]
    #[serial]
    fn reconcile_batch_size_is_capped() {
        env::set_var("RECONCILE_BATCH_SIZE", "50");
        assert_eq!(ReconcileConfig::from_env().batch_size, 50);

        env::set_var("RECONCILE_BATCH_SIZE", "100000");
        assert_eq!(ReconcileConfig::from_env().batch_size, MAX_BATCH_SIZE);

        env::remove_var("RECONCILE_BATCH_SIZE");
    }
}
