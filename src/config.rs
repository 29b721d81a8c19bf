//! # Store Configuration Module
//!
//! This module defines configuration structures for the persistence layer:
//! where the local cache lives, how to reach the remote store, and how remote
//! failures are retried and isolated.

use std::env;
use std::path::PathBuf;

// Constants for store configuration
pub const DEFAULT_DATA_DIR: &str = "./flowercost-data";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Recovery configuration for remote store error handling
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts for idempotent reads
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 200,  // 0.2 seconds
            max_retry_delay_ms: 5000,  // 5 seconds
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 30,
        }
    }
}

impl RecoveryConfig {
    /// Exponential backoff for the given attempt (0-based), capped, before jitter
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        self.base_retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms)
    }
}

/// Configuration for opening a session's repositories
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL connection string for remote mode
    pub database_url: Option<String>,
    /// Authenticated account identity; remote mode needs this and `database_url`
    pub account_id: Option<String>,
    /// Directory holding the local cache files
    pub data_dir: PathBuf,
    /// Connection pool size for the remote store
    pub max_connections: u32,
    /// Retry and circuit breaker settings
    pub recovery: RecoveryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            account_id: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Read configuration from environment variables
    ///
    /// Call `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            account_id: non_empty_var("FLOWERCOST_ACCOUNT_ID"),
            data_dir: non_empty_var("FLOWERCOST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: non_empty_var("FLOWERCOST_DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            recovery: defaults.recovery,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_defaults_are_reasonable() {
        let recovery = RecoveryConfig::default();
        assert!(recovery.max_retries <= 10);
        assert!(recovery.base_retry_delay_ms >= 100);
        assert!(recovery.base_retry_delay_ms <= recovery.max_retry_delay_ms);
        assert!(recovery.circuit_breaker_threshold > 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let recovery = RecoveryConfig::default();
        assert_eq!(recovery.backoff_ms(0), 200);
        assert_eq!(recovery.backoff_ms(1), 400);
        assert_eq!(recovery.backoff_ms(3), 1600);
        assert_eq!(recovery.backoff_ms(10), 5000);
        assert_eq!(recovery.backoff_ms(u32::MAX), 5000);
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }
}
