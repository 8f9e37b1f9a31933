//! Layered configuration loading.
//!
//! A project's effective configuration is built from, in increasing priority:
//! 1. `~/.strata/config.toml` (per user)
//! 2. `<project>/.strata/config.toml`
//! 3. [`ConfigOverrides`] supplied by the caller

use crate::error::ConfigError;
use crate::{ConfigOverrides, StrataConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// File name inside both config directories.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Per-user directory under the home directory.
const GLOBAL_CONFIG_DIR: &str = ".strata";

/// Per-project directory under the project root.
const LOCAL_CONFIG_DIR: &str = ".strata";

/// Reads, merges and writes Strata configuration files.
///
/// The per-user file is read once and kept until [`clear_cache`](Self::clear_cache).
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.strata`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<StrataConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader rooted at `~/.strata`, or without a per-user file when no home
    /// directory is known.
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Loader reading the per-user file from `global_dir`.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Path of the per-user file, if there is a home directory.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Path of the project file.
    pub fn local_config_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a project with optional overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates
    /// the result.
    pub fn load(
        &mut self,
        project_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<StrataConfig, ConfigError> {
        let mut config = StrataConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(project_root)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Read the per-user file alone; `None` when it does not exist.
    pub fn load_global(&mut self) -> Result<Option<StrataConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory; per-user config skipped");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("No user config at {:?}", global_path);
            return Ok(None);
        }

        debug!("Reading user config {:?}", global_path);
        let config = load_config_file(&global_path)?;

        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Read the project file alone; `None` when it does not exist.
    pub fn load_local(&self, project_root: &Path) -> Result<Option<StrataConfig>, ConfigError> {
        let local_path = self.local_config_path(project_root);

        if !local_path.exists() {
            trace!("No project config at {:?}", local_path);
            return Ok(None);
        }

        debug!("Reading project config {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Write `config` as the per-user file.
    pub fn save_global(&self, config: &StrataConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        let global_path = global_dir.join(CONFIG_FILE_NAME);
        save_config_file(&global_path, config)
    }

    /// Write `config` as the project file.
    pub fn save_local(&self, project_root: &Path, config: &StrataConfig) -> Result<(), ConfigError> {
        let local_path = self.local_config_path(project_root);
        save_config_file(&local_path, config)
    }

    /// Create `~/.strata/config.toml` with defaults unless it exists.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        if !global_dir.exists() {
            std::fs::create_dir_all(global_dir)
                .map_err(|e| ConfigError::create_dir(global_dir, e))?;
        }

        let config_path = global_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            save_config_file(&config_path, &StrataConfig::default())?;
        }

        Ok(config_path)
    }

    /// Create `<project>/.strata/config.toml` with defaults unless it exists.
    pub fn init_local(&self, project_root: &Path) -> Result<PathBuf, ConfigError> {
        let local_dir = project_root.join(LOCAL_CONFIG_DIR);

        if !local_dir.exists() {
            std::fs::create_dir_all(&local_dir)
                .map_err(|e| ConfigError::create_dir(&local_dir, e))?;
        }

        let config_path = local_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            save_config_file(&config_path, &StrataConfig::default())?;
        }

        Ok(config_path)
    }

    /// Forget the cached per-user file so the next load reads it again.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

/// Parse one TOML file.
fn load_config_file(path: &Path) -> Result<StrataConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Serialize `config` to `path`, creating parent directories.
fn save_config_file(path: &Path, config: &StrataConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Field-wise merge where values set in `overlay` win.
///
/// A field left at its default in `overlay` keeps the `base` value.
fn merge_configs(base: StrataConfig, overlay: StrataConfig) -> StrataConfig {
    StrataConfig {
        session: merge_session(base.session, overlay.session),
        cache: merge_cache(base.cache, overlay.cache),
        units: {
            // Units declared in the overlay replace same-named base units
            let mut units = base.units;
            units.extend(overlay.units);
            units
        },
        logging: merge_logging(base.logging, overlay.logging),
    }
}

fn merge_session(
    base: crate::SessionConfig,
    overlay: crate::SessionConfig,
) -> crate::SessionConfig {
    crate::SessionConfig {
        flush_mode: if overlay.flush_mode != crate::FlushMode::Auto {
            overlay.flush_mode
        } else {
            base.flush_mode
        },
        default_unit: overlay.default_unit.or(base.default_unit),
    }
}

fn merge_cache(base: crate::CacheConfig, overlay: crate::CacheConfig) -> crate::CacheConfig {
    crate::CacheConfig {
        max_entries: if overlay.max_entries != 0 {
            overlay.max_entries
        } else {
            base.max_entries
        },
    }
}

fn merge_logging(
    base: crate::LoggingConfig,
    overlay: crate::LoggingConfig,
) -> crate::LoggingConfig {
    crate::LoggingConfig {
        level: if overlay.level != "info" {
            overlay.level
        } else {
            base.level
        },
        format: overlay.format,
        file: overlay.file.or(base.file),
    }
}
