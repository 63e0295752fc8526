//! Configuration management
//!
//! Everything the sync engine needs from the environment: remote API
//! credentials and paging, rate-limit behavior, and database pool sizing.
//! Loaded once at process start; `validate()` rejects configurations that
//! could only fail later at runtime.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use stockmirror_common::{MirrorError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default page size requested from the remote API.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default sleep between rate-limited retries, in seconds.
pub const DEFAULT_RATE_LIMIT_SLEEP_SECS: u64 = 20;

/// Default cap on rate-limited retries for a single page request.
/// 45 attempts at 20s apart gives the source roughly fifteen minutes to
/// recover before the run fails.
pub const DEFAULT_RATE_LIMIT_MAX_RETRIES: u32 = 45;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/stockmirror";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Top-level sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the remote REST API
    pub base_url: String,
    /// Basic-auth username (the API key)
    pub api_key: String,
    /// Basic-auth password; most deployments leave this empty
    pub api_password: String,
    /// Records requested per page
    pub page_size: usize,
    /// Fixed sleep between retries after an HTTP 429
    pub rate_limit_sleep_secs: u64,
    /// Retry budget for a single rate-limited request
    pub rate_limit_max_retries: u32,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl SyncConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = SyncConfig {
            api: ApiConfig {
                base_url: std::env::var("MIRROR_API_BASE_URL").unwrap_or_default(),
                api_key: std::env::var("MIRROR_API_KEY").unwrap_or_default(),
                api_password: std::env::var("MIRROR_API_PASSWORD").unwrap_or_default(),
                page_size: env_parse("MIRROR_PAGE_SIZE", DEFAULT_PAGE_SIZE),
                rate_limit_sleep_secs: env_parse(
                    "MIRROR_RATE_LIMIT_SLEEP_SECS",
                    DEFAULT_RATE_LIMIT_SLEEP_SECS,
                ),
                rate_limit_max_retries: env_parse(
                    "MIRROR_RATE_LIMIT_MAX_RETRIES",
                    DEFAULT_RATE_LIMIT_MAX_RETRIES,
                ),
                request_timeout_secs: env_parse(
                    "MIRROR_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(MirrorError::Config(
                "MIRROR_API_BASE_URL must be set".to_string(),
            ));
        }
        if self.api.api_key.is_empty() {
            return Err(MirrorError::Config(
                "MIRROR_API_KEY must be set".to_string(),
            ));
        }
        if self.api.page_size == 0 {
            return Err(MirrorError::Config(
                "Page size must be greater than 0".to_string(),
            ));
        }
        if self.api.rate_limit_max_retries == 0 {
            return Err(MirrorError::Config(
                "Rate limit retry budget must be greater than 0".to_string(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(MirrorError::Config(
                "Database URL cannot be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(MirrorError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(MirrorError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Build the shared connection pool from this configuration
    pub async fn connect_pool(&self) -> std::result::Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: String::new(),
                api_key: String::new(),
                api_password: String::new(),
                page_size: DEFAULT_PAGE_SIZE,
                rate_limit_sleep_secs: DEFAULT_RATE_LIMIT_SLEEP_SECS,
                rate_limit_max_retries: DEFAULT_RATE_LIMIT_MAX_RETRIES,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.api.base_url = "https://api.example.test".to_string();
        config.api.api_key = "key".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let mut config = valid_config();
        config.api.base_url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut config = valid_config();
        config.api.api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = valid_config();
        config.api.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_rejected() {
        let mut config = valid_config();
        config.database.min_connections = 20;
        config.database.max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.api.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.api.rate_limit_sleep_secs, DEFAULT_RATE_LIMIT_SLEEP_SECS);
        assert_eq!(config.api.rate_limit_max_retries, DEFAULT_RATE_LIMIT_MAX_RETRIES);
    }
}
