//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Permission catalog source
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Override store behaviour
    #[serde(default)]
    pub overrides: OverridesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Table holding principals, used to validate grant targets
    #[serde(default = "default_principals_table")]
    pub principals_table: String,

    /// Identifier column of `principals_table`
    #[serde(default = "default_principals_id_column")]
    pub principals_id_column: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            principals_table: default_principals_table(),
            principals_id_column: default_principals_id_column(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Where the permission catalog is loaded from.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// A TOML seed file, or the built-in defaults when no path is set
    #[default]
    File,
    /// The `permissions`, `roles` and `role_permissions` tables
    Database,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// Path to a TOML catalog seed
    #[serde(default)]
    pub seed_path: Option<String>,

    #[serde(default)]
    pub source: CatalogSource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverridesConfig {
    /// Cache override rows per principal
    #[serde(default)]
    pub cache_enabled: bool,

    /// How long a cached principal entry lives
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Run the background expiry sweep
    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,

    /// Interval between expiry sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for OverridesConfig {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_ttl: default_cache_ttl(),
            sweep_enabled: default_sweep_enabled(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl OverridesConfig {
    pub fn cache_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout_secs() -> u64 { 5 }
fn default_principals_table() -> String { "users".to_string() }
fn default_principals_id_column() -> String { "id".to_string() }
fn default_cache_ttl() -> Duration { Duration::from_secs(30) }
fn default_sweep_enabled() -> bool { true }
fn default_sweep_interval() -> Duration { Duration::from_secs(300) }

impl Config {
    /// Load configuration from the environment (`WARDEN__SECTION__KEY`).
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// The database URL, or a configuration error naming the variable.
    pub fn database_url(&self) -> crate::error::Result<&str> {
        self.database.url.as_deref().ok_or_else(|| {
            crate::error::WardenError::new(
                crate::error::ErrorCode::MissingConfiguration,
                "Database URL is not configured (set WARDEN__DATABASE__URL)",
            )
        })
    }
}
