//! Configuration loading
//!
//! ```ron
//! (
//!     delivery: (
//!         retry: (max_retries: 3),
//!         send_timeout_secs: 10,
//!     ),
//!     recovery: (
//!         max_attempts: 5,
//!         default_strategies: [ExponentialBackoff, StateSync],
//!     ),
//!     janitor: (
//!         interval_secs: 300,
//!         max_age_secs: 1800,
//!     ),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tether_common::JanitorConfig;
use tether_delivery::DeliveryConfig;
use tether_recovery::RecoveryConfig;
use thiserror::Error;

pub const CONFIG_ENV: &str = "TETHER_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./tether.config.ron", "/etc/tether/tether.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TETHER_CONFIG points to non-existent file: {}", .0.display())]
    MissingEnvPath(PathBuf),

    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl TetherConfig {
    /// Parse and validate a RON document
    ///
    /// # Errors
    /// If the document does not parse or holds unusable values
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`
    ///
    /// # Errors
    /// If the file can't be read, or see [`Self::from_ron`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_ron(&content)
    }

    /// Check every section for values the runtime can't work with
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "delivery.retry.max_retries must be at least 1".to_string(),
            ));
        }

        if self.delivery.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "delivery.send_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.janitor.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "janitor.interval_secs must be at least 1".to_string(),
            ));
        }

        self.recovery.validate().map_err(ConfigError::Invalid)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `TETHER_CONFIG` environment variable
/// 2. ./tether.config.ron (current working directory)
/// 3. /etc/tether/tether.config.ron (system-wide config)
///
/// Returns `Ok(None)` when no file exists and the variable is unset.
///
/// # Errors
/// If `TETHER_CONFIG` is set but points nowhere
pub fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    let candidates = DEFAULT_PATHS.map(PathBuf::from);
    locate(std::env::var(CONFIG_ENV).ok(), &candidates)
}

fn locate(
    env_path: Option<String>,
    candidates: &[PathBuf],
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::MissingEnvPath(path));
    }

    Ok(candidates.iter().find(|path| path.exists()).cloned())
}
