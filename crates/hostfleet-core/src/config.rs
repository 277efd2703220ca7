//! Configuration types for the pool, fan-out and host inventory

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use hostfleet_exec::HostIdentity;
use hostfleet_exec::session::{DEFAULT_CONNECT_TIMEOUT, SessionOptions};
use hostfleet_exec::transfer::DEFAULT_STAGING_DIR;

use crate::error::CoreError;

/// Top-level fleet configuration, usually read from `hostfleet.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Session pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Fan-out settings
    #[serde(default)]
    pub fanout: FanOutConfig,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
    /// Host inventory
    #[serde(default)]
    pub host: Vec<HostIdentity>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            fanout: FanOutConfig::default(),
            log_level: default_log_level(),
            log_json: false,
            host: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Executor pool settings
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Bound on dial, handshake and authentication, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

/// Fan-out settings
#[derive(Debug, Clone, Deserialize)]
pub struct FanOutConfig {
    /// Deadline for each host's leaf, in seconds; unset means no deadline
    #[serde(default)]
    pub per_host_timeout_secs: Option<u64>,
    /// Remote directory for staging file transfers
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            per_host_timeout_secs: None,
            staging_dir: default_staging_dir(),
        }
    }
}

fn default_staging_dir() -> String {
    DEFAULT_STAGING_DIR.to_string()
}

impl FanOutConfig {
    /// Per-host deadline
    pub fn per_host_timeout(&self) -> Option<Duration> {
        self.per_host_timeout_secs.map(Duration::from_secs)
    }
}

impl FleetConfig {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` on malformed TOML or an empty staging
    /// directory, `CoreError::HostAlreadyExists` on duplicate host names
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: FleetConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = std::collections::HashSet::new();
        for host in &self.host {
            if !seen.insert(host.name()) {
                return Err(CoreError::HostAlreadyExists(host.name().to_string()));
            }
        }
        if self.fanout.staging_dir.trim().is_empty() {
            return Err(CoreError::ConfigError("fanout.staging_dir is empty".to_string()));
        }
        Ok(())
    }

    /// Options for sessions opened by the production factory
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_secs(self.pool.connect_timeout_secs),
            staging_dir: self.fanout.staging_dir.clone(),
        }
    }
}
