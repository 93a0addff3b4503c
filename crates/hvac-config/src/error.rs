//! Error types for configuration loading

use hvac_core::EntityIdError;
use std::path::PathBuf;
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

    /// Failed to parse a JSON options object
    #[error("failed to parse JSON options: {0}")]
    ParseJson(#[from] serde_json::Error),

    /// An entity id in the options is malformed
    #[error("invalid entity id for '{key}': {source}")]
    InvalidEntityId {
        key: String,
        #[source]
        source: EntityIdError,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Neither heaters nor coolers were configured
    #[error("group '{name}' has no heaters and no coolers")]
    NoActuators { name: String },
}
