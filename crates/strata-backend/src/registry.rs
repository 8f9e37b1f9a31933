//! Client registry built from persistence-unit configuration.
//!
//! Resolves unit names to backend clients from `[units.<name>]` entries and
//! keeps one shared client per unit, so every entity manager created by a
//! factory sees the same store.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_config::{ClientKind, ConfigLoader, ConfigOverrides, PersistenceUnitConfig, StrataConfig};
use strata_core::{Client, ClientError, ClientFactory, DEFAULT_UNIT};
use tracing::{debug, info};

use crate::error::BackendError;
use crate::memory::InMemoryClient;
use crate::sqlite::SqliteClient;

/// Registry of backend clients keyed by persistence unit.
pub struct ClientRegistry {
    /// Loaded configuration (units and default unit)
    config: StrataConfig,

    /// Root that relative database paths resolve against
    project_root: PathBuf,

    /// Clients opened so far
    clients: RwLock<HashMap<String, Arc<dyn Client>>>,
}

impl ClientRegistry {
    /// Create a registry from an already loaded configuration.
    pub fn new(config: StrataConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Load global and project configuration, then build a registry.
    pub fn load(
        project_root: impl AsRef<Path>,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<Self, BackendError> {
        Self::load_with(&mut ConfigLoader::new(), project_root, overrides)
    }

    /// Like [`load`](Self::load) with a caller-supplied loader.
    pub fn load_with(
        loader: &mut ConfigLoader,
        project_root: impl AsRef<Path>,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<Self, BackendError> {
        let project_root = project_root.as_ref();
        let config = loader.load(project_root, overrides)?;
        Ok(Self::new(config, project_root))
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Register a client directly, replacing any client of the same unit.
    pub fn register(&self, unit: impl Into<String>, client: Arc<dyn Client>) {
        let unit = unit.into();
        debug!("Registered client for unit '{}'", unit);
        self.clients.write().insert(unit, client);
    }

    /// Units declared in configuration or registered directly, sorted.
    pub fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = self
            .config
            .units
            .keys()
            .chain(self.clients.read().keys())
            .cloned()
            .collect();
        units.sort();
        units.dedup();
        units
    }

    /// Number of clients opened or registered.
    pub fn open_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Name under which `unit` is configured.
    ///
    /// The reserved default unit maps to `session.default_unit` unless a unit
    /// is configured under that exact name.
    fn resolve_name<'a>(&'a self, unit: &'a str) -> Option<&'a str> {
        if self.config.units.contains_key(unit) || self.clients.read().contains_key(unit) {
            return Some(unit);
        }
        if unit == DEFAULT_UNIT {
            return self.config.session.default_unit.as_deref();
        }
        None
    }

    fn open(&self, name: &str, unit: &PersistenceUnitConfig) -> Result<Arc<dyn Client>, BackendError> {
        let client: Arc<dyn Client> = match unit.kind {
            ClientKind::Memory => Arc::new(InMemoryClient::new(name)),
            ClientKind::Sqlite => match self.config.unit_path(name, &self.project_root) {
                Some(path) => Arc::new(SqliteClient::open(name, path)?),
                None => Arc::new(SqliteClient::in_memory(name)?),
            },
        };
        info!("Opened {} client for unit '{}'", unit.kind, name);
        Ok(client)
    }
}

impl ClientFactory for ClientRegistry {
    fn create(&self, unit: &str) -> Result<Arc<dyn Client>, ClientError> {
        let name = self
            .resolve_name(unit)
            .ok_or_else(|| ClientError::unknown_unit(unit))?
            .to_string();

        if let Some(client) = self.clients.read().get(&name) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write();
        // Another manager may have opened it meanwhile
        if let Some(client) = clients.get(&name) {
            return Ok(Arc::clone(client));
        }
        let config = self
            .config
            .units
            .get(&name)
            .ok_or_else(|| ClientError::unknown_unit(&name))?;
        let client = self.open(&name, config)?;
        clients.insert(name, Arc::clone(&client));
        Ok(client)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("project_root", &self.project_root)
            .field("units", &self.units())
            .finish_non_exhaustive()
    }
}
