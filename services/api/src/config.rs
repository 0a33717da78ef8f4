//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_METADATA_ENDPOINT: &str = "https://www.googleapis.com/books/v1/volumes";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Where the per-user collection mirrors are written.
    pub cache_dir: PathBuf,
    /// Where the pre-sync app left its local storage blobs.
    pub legacy_dir: PathBuf,
    pub metadata_endpoint: String,
    pub metadata_api_key: Option<String>,
    pub start_online: bool,
    pub allowed_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Local storage ---
        let cache_dir = var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/cache"));
        let legacy_dir = var("LEGACY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/legacy"));

        // --- Metadata lookup ---
        let metadata_endpoint = var("METADATA_ENDPOINT").unwrap_or_else(|| DEFAULT_METADATA_ENDPOINT.to_string());
        let metadata_api_key = var("METADATA_API_KEY").filter(|key| !key.trim().is_empty());

        let start_online = match var("START_ONLINE") {
            None => true,
            Some(value) => value.trim().parse::<bool>().map_err(|_| {
                ConfigError::InvalidValue("START_ONLINE".to_string(), format!("'{}' is not true or false", value))
            })?,
        };
        let allowed_origin = var("ALLOWED_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cache_dir,
            legacy_dir,
            metadata_endpoint,
            metadata_api_key,
            start_online,
            allowed_origin,
        })
    }
}
