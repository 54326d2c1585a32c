//! Configuration Module
//!
//! Handles loading and validating engine configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Engine and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the local tier can hold
    pub max_entries: usize,
    /// Fallback TTL in seconds for keys whose category has no policy row
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Shared tier URL; `None` runs the engine local-only
    pub redis_url: Option<String>,
    /// Upper bound for every remote call in milliseconds
    pub remote_timeout_ms: u64,
    /// Connection pool size for the shared tier
    pub redis_pool_size: usize,
    /// Extra TTL rows as (category, seconds)
    pub ttl_overrides: Vec<(String, u64)>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Local tier capacity (default: 1000)
    /// - `DEFAULT_TTL` - Fallback TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `REDIS_URL` - Shared tier URL (default: unset, local-only)
    /// - `REMOTE_TIMEOUT_MS` - Remote call timeout (default: 500)
    /// - `REDIS_POOL_SIZE` - Pool size (default: 16)
    /// - `CACHE_TTL_OVERRIDES` - `category=secs,...` (default: empty)
    ///
    /// Malformed `CACHE_TTL_OVERRIDES` is a configuration error; the numeric
    /// variables fall back to their defaults when unparsable.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let ttl_overrides = match env::var("CACHE_TTL_OVERRIDES") {
            Ok(raw) => parse_ttl_overrides(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            max_entries: parse_var("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            default_ttl: parse_var("DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            remote_timeout_ms: parse_var("REMOTE_TIMEOUT_MS")
                .unwrap_or(defaults.remote_timeout_ms),
            redis_pool_size: parse_var("REDIS_POOL_SIZE").unwrap_or(defaults.redis_pool_size),
            ttl_overrides,
        })
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::Configuration(
                "max_entries must be positive".to_string(),
            ));
        }
        if self.default_ttl == 0 {
            return Err(CacheError::Configuration(
                "default_ttl must be positive".to_string(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(CacheError::Configuration(
                "cleanup_interval must be positive".to_string(),
            ));
        }
        if self.remote_timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "remote_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            server_port: 3000,
            cleanup_interval: 1,
            redis_url: None,
            remote_timeout_ms: 500,
            redis_pool_size: 16,
            ttl_overrides: Vec::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parses `category=secs` pairs separated by commas.
fn parse_ttl_overrides(raw: &str) -> Result<Vec<(String, u64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (category, secs) = pair.split_once('=').ok_or_else(|| {
                CacheError::Configuration(format!("TTL override '{}' is missing '='", pair))
            })?;
            let category = category.trim();
            if category.is_empty() {
                return Err(CacheError::Configuration(format!(
                    "TTL override '{}' has an empty category",
                    pair
                )));
            }
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                CacheError::Configuration(format!("TTL override '{}' is not a number", pair))
            })?;
            Ok((category.to_string(), secs))
        })
        .collect()
}
