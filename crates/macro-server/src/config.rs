//! Daemon configuration
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! config_dir: /var/lib/macrod
//! log_level: debug
//! engine:
//!   interval_ms: 300
//!   on_change_policy: independent
//! ```
//!
//! Every key is optional.

use macro_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding the `.storage/` folder
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Default log filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scheduler settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            log_level: default_log_level(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::ParseYaml { source, .. } => ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        // Relative storage paths resolve against the config file location
        if config.config_dir.is_relative() {
            if let Some(parent) = path.parent() {
                return Ok(Self {
                    config_dir: parent.join(&config.config_dir),
                    ..config
                });
            }
        }

        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        // An empty file is a valid, all-defaults configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.engine.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
