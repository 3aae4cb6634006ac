//! Configuration loading with Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with DR_LOGGER_)
//!
//! # Example
//! ```no_run
//! use dr_logger::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use crate::watcher::WatcherSpec;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Storage backend settings
    pub storage: StorageConfig,
    /// Rig definitions, one session each
    #[serde(default)]
    pub rigs: Vec<RigConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection (csv or memory)
    pub backend: String,
    /// Root directory for the csv backend
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

/// One rig: a named physical setup with its own watchers, dataset path and
/// poll interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Unique rig name
    pub name: String,
    /// Store path for this rig's datasets; defaults to `DR/<name>`
    #[serde(default)]
    pub path: Option<String>,
    /// Dataset name template; `[t]` resolves to the creation time.
    /// Defaults to `<name> log - [t]`
    #[serde(default)]
    pub dataset_name: Option<String>,
    /// Poll interval (humantime, e.g. "1s", "500ms")
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    /// Watchers to instantiate, in row order
    pub watchers: Vec<WatcherSpec>,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

impl RigConfig {
    /// Store path, with the `DR/<name>` default applied.
    pub fn dataset_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("DR/{}", self.name))
    }

    /// Dataset name template, with the `<name> log - [t]` default applied.
    pub fn dataset_name(&self) -> String {
        self.dataset_name
            .clone()
            .unwrap_or_else(|| format!("{} log - [t]", self.name))
    }
}

impl Config {
    /// Load configuration from config/dr-logger.toml and environment
    /// variables.
    ///
    /// Environment variables override configuration with prefix DR_LOGGER_,
    /// e.g. DR_LOGGER_APPLICATION_LOG_LEVEL=debug.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/dr-logger.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DR_LOGGER_").split("_"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_backends = ["csv", "memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            ));
        }

        let mut names = std::collections::HashSet::new();
        for rig in &self.rigs {
            if rig.name.is_empty() {
                return Err("Rig name must not be empty".to_string());
            }
            if !names.insert(&rig.name) {
                return Err(format!("Duplicate rig name: {}", rig.name));
            }
            if rig.interval.is_zero() {
                return Err(format!("Rig '{}' has a zero poll interval", rig.name));
            }
            if rig.watchers.is_empty() {
                return Err(format!("Rig '{}' declares no watchers", rig.name));
            }
        }

        Ok(())
    }
}
