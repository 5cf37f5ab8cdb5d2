//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::cache::DEFAULT_CACHE_TIME_MS;

/// Default location of the persisted key-value file.
pub const DEFAULT_STORAGE_PATH: &str = ".cache/storage.json";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the JSON file backing the store
    pub storage_path: PathBuf,
    /// Default TTL in milliseconds for entries set without explicit TTL
    pub default_ttl_ms: u64,
    /// Background sweep interval in seconds
    pub sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STORAGE_PATH` - Storage file path (default: `.cache/storage.json`)
    /// - `DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 3600000)
    /// - `SWEEP_INTERVAL` - Expired-entry sweep frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_path: env::var("STORAGE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            default_ttl_ms: env::var("DEFAULT_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ttl: &u64| *ttl > 0)
                .unwrap_or(defaults.default_ttl_ms),
            sweep_interval: env::var("SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            default_ttl_ms: DEFAULT_CACHE_TIME_MS,
            sweep_interval: 60,
        }
    }
}
