//! Backend client traits and per-manager client resolution.

use crate::error::{ClientError, PersistenceError, Result};
use crate::flush::JoinTableData;
use crate::metadata::{EntityDescriptor, JoinTable};
use crate::value::{Row, Value};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Unit used for entities whose descriptor names none.
pub const DEFAULT_UNIT: &str = "default";

/// Read and write primitives for one backing store.
///
/// Rows passed to `persist` and `merge` hold the identifier (unless the store
/// generates it), declared columns and foreign-key columns. Implementations
/// must be safe to share between entity managers.
pub trait Client: Send + Sync {
    /// Persistence unit this client serves.
    fn persistence_unit(&self) -> &str;

    /// Write a new row (or overwrite an existing one) and return its key.
    ///
    /// When the row carries no identifier the store generates one.
    fn persist(&self, entity: &EntityDescriptor, row: &Row) -> std::result::Result<Value, ClientError>;

    fn find(&self, entity: &EntityDescriptor, key: &Value) -> std::result::Result<Option<Row>, ClientError>;

    /// Rows whose `join_column` equals `value`.
    fn find_by_relation(
        &self,
        entity: &EntityDescriptor,
        join_column: &str,
        value: &Value,
    ) -> std::result::Result<Vec<Row>, ClientError>;

    /// Rows matching every column value in `columns`.
    fn find_by_columns(
        &self,
        entity: &EntityDescriptor,
        columns: &Row,
    ) -> std::result::Result<Vec<Row>, ClientError>;

    /// Inverse keys associated with `owner` through a join table.
    fn find_join_keys(
        &self,
        join_table: &JoinTable,
        owner: &Value,
    ) -> std::result::Result<Vec<Value>, ClientError>;

    /// Replace the stored row for `key`.
    fn merge(&self, entity: &EntityDescriptor, key: &Value, row: &Row) -> std::result::Result<(), ClientError>;

    fn remove(&self, entity: &EntityDescriptor, key: &Value) -> std::result::Result<(), ClientError>;

    /// Delete every row of `table` whose `column` equals `value`; returns the
    /// number of rows deleted. `table` may be an entity table or a join table.
    fn delete_by_column(&self, table: &str, column: &str, value: &Value)
        -> std::result::Result<usize, ClientError>;

    fn persist_join_table(&self, data: &JoinTableData) -> std::result::Result<(), ClientError>;

    /// Signal that a session using this client is done.
    fn close(&self) -> std::result::Result<(), ClientError> {
        Ok(())
    }
}

/// Creates clients by persistence-unit name.
pub trait ClientFactory: Send + Sync {
    fn create(&self, unit: &str) -> std::result::Result<Arc<dyn Client>, ClientError>;
}

/// Lazily resolved clients of one entity manager, one per persistence unit.
pub struct ClientMap {
    factory: Arc<dyn ClientFactory>,
    clients: DashMap<String, Arc<dyn Client>>,
}

impl ClientMap {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
        }
    }

    /// Client for `unit`, created on first use.
    pub fn resolve(&self, unit: Option<&str>) -> Result<Arc<dyn Client>> {
        let unit = unit.unwrap_or(DEFAULT_UNIT);
        if let Some(client) = self.clients.get(unit) {
            return Ok(Arc::clone(client.value()));
        }

        // Created under the entry's shard lock, so a unit gets one client
        let entry = self
            .clients
            .entry(unit.to_string())
            .or_try_insert_with(|| {
                debug!("Resolving client for persistence unit '{}'", unit);
                self.factory.create(unit)
            })
            .map_err(|e| PersistenceError::client_resolution(unit, e))?;
        Ok(Arc::clone(entry.value()))
    }

    pub fn for_entity(&self, descriptor: &EntityDescriptor) -> Result<Arc<dyn Client>> {
        self.resolve(descriptor.unit())
    }

    /// Close every resolved client and forget them.
    ///
    /// All clients are closed even if one fails; the first failure is
    /// returned.
    pub fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for entry in self.clients.iter() {
            if let Err(e) = entry.value().close() {
                first_error.get_or_insert(PersistenceError::Client(e));
            }
        }
        self.clients.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of resolved clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ClientMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMap")
            .field("units", &self.clients.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}
