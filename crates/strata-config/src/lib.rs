//! Strata Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.strata/config.toml`
//! - Local config: `.strata/config.toml` (in the project directory)
//! - Programmatic overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides.

mod error;
mod loader;
mod logging;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use logging::init_logging;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration for Strata.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StrataConfig {
    /// Session defaults for entity managers
    pub session: SessionConfig,

    /// Shared cache configuration
    pub cache: CacheConfig,

    /// Persistence units (unit name → backend client settings)
    pub units: HashMap<String, PersistenceUnitConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session defaults applied to every entity manager.
///
/// # Example TOML
///
/// ```toml
/// [session]
/// flush_mode = "manual"
/// default_unit = "main"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// When pending writes reach the backends
    pub flush_mode: FlushMode,

    /// Unit used by entity types that do not name one
    pub default_unit: Option<String>,
}

/// Flush mode of an entity manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Every persist/merge/remove writes immediately (default)
    #[default]
    Auto,
    /// Writes are queued until the transaction commits
    Manual,
}

impl std::fmt::Display for FlushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for FlushMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" | "commit" => Ok(Self::Manual),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown flush mode: '{}'. Valid values: auto, manual",
                s
            ))),
        }
    }
}

/// Shared cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached head entities (0 = unbounded)
    pub max_entries: usize,
}

/// Backend client settings for one persistence unit.
///
/// # Example TOML
///
/// ```toml
/// [units.main]
/// kind = "sqlite"
/// path = "data/main.db"
///
/// [units.scratch]
/// kind = "memory"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PersistenceUnitConfig {
    /// Which client implementation serves this unit
    pub kind: ClientKind,

    /// Database file (sqlite only; in-memory database when absent)
    pub path: Option<PathBuf>,
}

/// Backend client implementation selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// Process-local tables (default)
    #[default]
    Memory,
    /// SQLite database storing rows as JSON documents
    Sqlite,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown client kind: '{}'. Valid values: memory, sqlite",
                s
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,

    /// Log file path (optional)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// Overrides applied over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override flush mode
    pub flush_mode: Option<FlushMode>,

    /// Override default persistence unit
    pub default_unit: Option<String>,

    /// Override cache capacity
    pub cache_max_entries: Option<usize>,

    /// Override log level
    pub log_level: Option<String>,
}

impl StrataConfig {
    /// Apply overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(flush_mode) = overrides.flush_mode {
            self.session.flush_mode = flush_mode;
        }

        if let Some(ref unit) = overrides.default_unit {
            self.session.default_unit = Some(unit.clone());
        }

        if let Some(max_entries) = overrides.cache_max_entries {
            self.cache.max_entries = max_entries;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    ///
    /// Checks that unit names are usable, that only sqlite units name a
    /// database path and that the default unit exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, unit) in &self.units {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "units",
                    "persistence unit names must not be empty",
                ));
            }
            if unit.kind == ClientKind::Memory && unit.path.is_some() {
                return Err(ConfigError::invalid_value(
                    format!("units.{}.path", name),
                    "memory units do not take a path",
                ));
            }
        }

        if let Some(ref unit) = self.session.default_unit {
            if !self.units.contains_key(unit) {
                return Err(ConfigError::unit_not_found(unit));
            }
        }

        Ok(())
    }

    /// Get the settings of a persistence unit.
    pub fn unit(&self, name: &str) -> Result<&PersistenceUnitConfig, ConfigError> {
        self.units
            .get(name)
            .ok_or_else(|| ConfigError::unit_not_found(name))
    }

    /// Get the effective database path of a unit, resolved against the project root.
    ///
    /// Returns `None` for units without a path.
    pub fn unit_path(&self, name: &str, project_root: &Path) -> Option<PathBuf> {
        let path = self.units.get(name)?.path.as_ref()?;
        if path.is_absolute() {
            Some(path.clone())
        } else {
            Some(project_root.join(path))
        }
    }
}
