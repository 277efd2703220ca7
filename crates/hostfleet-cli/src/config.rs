//! Configuration file lookup

use std::path::{Path, PathBuf};

use hostfleet_core::FleetConfig;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "HOSTFLEET_CONFIG";

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A config file
    File(PathBuf),
    /// No file found; built-in defaults
    Defaults,
}

/// Resolve the config path: explicit flag, then env var, then common paths
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    candidates().into_iter().find(|path| path.exists())
}

fn candidates() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("hostfleet.toml"),
        PathBuf::from("/etc/hostfleet/hostfleet.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("hostfleet/hostfleet.toml"));
    }
    paths
}

/// Load the fleet configuration
///
/// # Errors
/// Returns error if an explicitly named or discovered file cannot be read,
/// parsed or validated
pub fn load(explicit: Option<&Path>) -> eyre::Result<(FleetConfig, ConfigSource)> {
    match locate(explicit) {
        Some(path) => {
            let config = FleetConfig::load(&path)?;
            Ok((config, ConfigSource::File(path)))
        }
        None => Ok((FleetConfig::default(), ConfigSource::Defaults)),
    }
}
