//! Configuration for the mobile bridge.
//!
//! The bridge is embedded in a host application, so everything has a usable
//! default. A TOML file can be supplied through `COENTRO_MOBILE_CONFIG`, and
//! individual values can be overridden with `COENTRO_MOBILE_*` variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::DEFAULT_LOG_TAG;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "COENTRO_MOBILE_CONFIG";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Settings for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Directory holding the per-interface control sockets
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Tag attached to every platform log record
    #[serde(default = "default_log_tag")]
    pub log_tag: String,

    /// Worker threads for the runtime driving control listeners
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Number of tunnel handles that may be live at once
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: i32,
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/run/coentrovpn")
}

fn default_log_tag() -> String {
    DEFAULT_LOG_TAG.to_string()
}

fn default_worker_threads() -> usize {
    num_cpus::get().clamp(1, 2)
}

fn default_max_tunnels() -> i32 {
    i32::MAX
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            socket_dir: default_socket_dir(),
            log_tag: default_log_tag(),
            worker_threads: default_worker_threads(),
            max_tunnels: default_max_tunnels(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        // Environment variables take precedence over the file
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration the host environment asks for.
    ///
    /// Reads the file named by `COENTRO_MOBILE_CONFIG` when set, otherwise
    /// starts from the defaults; overrides apply in both cases.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => {
                let mut config = BridgeConfig::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "socket_dir".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.log_tag.is_empty() || self.log_tag.contains('\0') {
            return Err(ConfigError::InvalidValue {
                key: "log_tag".to_string(),
                message: "must be a non-empty string without NUL bytes".to_string(),
            });
        }

        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "worker_threads".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.max_tunnels <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tunnels".to_string(),
                message: "must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Apply `COENTRO_MOBILE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("COENTRO_MOBILE_SOCKET_DIR") {
            if !v.is_empty() {
                self.socket_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("COENTRO_MOBILE_LOG_TAG") {
            if !v.is_empty() {
                self.log_tag = v;
            }
        }
        if let Ok(v) = env::var("COENTRO_MOBILE_WORKER_THREADS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.worker_threads = n;
            }
        }
        if let Ok(v) = env::var("COENTRO_MOBILE_MAX_TUNNELS") {
            if let Ok(n) = v.trim().parse::<i32>() {
                self.max_tunnels = n;
            }
        }
    }
}
