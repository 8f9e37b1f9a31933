//! Errors raised while reading, merging or writing configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`StrataConfig`](crate::StrataConfig)
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// TOML encoding failed while saving
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Config file could not be written
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `.strata` directory could not be created
    #[error("failed to create config directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No home directory for the per-user file
    #[error("could not determine home directory")]
    NoHomeDir,

    /// A single key holds an unusable value
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Persistence unit not declared
    #[error("persistence unit '{name}' not found in configuration")]
    UnitNotFound { name: String },

    /// Cross-field validation failed
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// Logging could not be initialized
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn unit_not_found(name: impl Into<String>) -> Self {
        Self::UnitNotFound { name: name.into() }
    }
}
