//! Configuration management for flightdelay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL_DAYS;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flightdelay";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "lookup.db";

/// File holding the client's saved identity.
const IDENTITY_FILE_NAME: &str = "identity";

/// Default number of uncached lookups per free identity per UTC day.
pub const DEFAULT_DAILY_LIMIT: u32 = 20;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTDELAY_`, sections separated
///    by `__`, e.g. `FLIGHTDELAY_UPSTREAM__API_KEY`)
/// 2. TOML config file at `~/.config/flightdelay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Upstream history API configuration.
    pub upstream: UpstreamConfig,
    /// Quota configuration.
    pub quota: QuotaConfig,
    /// Result cache configuration.
    pub cache: CacheConfig,
    /// Lookup client configuration.
    pub client: ClientConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub bind_address: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/flightdelay/lookup.db`
    pub database_path: Option<PathBuf>,
    /// Interval between stale cache prunes in hours.
    /// Set to 0 to disable background pruning.
    pub prune_interval_hours: u32,
}

/// Upstream history API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the history API.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of days of history to query.
    pub history_days: u32,
}

/// Quota configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Uncached lookups allowed per free identity per UTC day.
    pub daily_limit: u32,
}

/// Result cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Days a computed result is served before it is refreshed.
    pub ttl_days: u32,
}

/// Lookup client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the lookup service.
    pub service_url: String,
    /// Identity to present; registered on first use when unset.
    pub identity_id: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            prune_interval_hours: 24,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aeroapi.flightaware.com/aeroapi".to_string(),
            api_key: None,
            timeout_secs: 30,
            history_days: 7,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: DEFAULT_TTL_DAYS,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8080".to_string(),
            identity_id: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FLIGHTDELAY_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.bind_address()?;

        if self.quota.daily_limit == 0 {
            return Err(Error::config_validation(
                "daily_limit must be greater than 0",
            ));
        }

        if self.cache.ttl_days == 0 {
            return Err(Error::config_validation("ttl_days must be greater than 0"));
        }

        if self.upstream.history_days == 0 {
            return Err(Error::config_validation(
                "history_days must be greater than 0",
            ));
        }

        if self.upstream.timeout_secs == 0 || self.client.timeout_secs == 0 {
            return Err(Error::config_validation(
                "timeout_secs must be greater than 0",
            ));
        }

        for (name, url) in [
            ("upstream.base_url", &self.upstream.base_url),
            ("client.service_url", &self.client.service_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::config_validation(format!(
                    "{name} must be an http(s) URL: {url}"
                )));
            }
        }

        Ok(())
    }

    /// Parse the server bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not a valid socket address.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server.bind_address.parse().map_err(|_| {
            Error::config_validation(format!(
                "invalid bind_address: {}",
                self.server.bind_address
            ))
        })
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// File where the lookup client keeps an auto-registered identity.
    #[must_use]
    pub fn identity_path() -> PathBuf {
        Self::default_data_dir().join(IDENTITY_FILE_NAME)
    }

    /// Get the cache time-to-live.
    #[must_use]
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cache.ttl_days))
    }

    /// Get the prune interval, or `None` if background pruning is disabled.
    #[must_use]
    pub fn prune_interval(&self) -> Option<Duration> {
        if self.storage.prune_interval_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.prune_interval_hours) * 60 * 60,
            ))
        }
    }

    /// A copy safe to print: secrets are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.upstream.api_key.is_some() {
            config.upstream.api_key = Some("********".to_string());
        }
        config
    }
}
