//! Common test utilities for integration tests.
//!
//! Provides a recording in-process client, a factory serving it for fixed
//! unit names, and the entity schema shared by the integration tests.

#![allow(dead_code)]
#![allow(unused_imports)]

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use strata_core::{
    CascadeSet, CascadeType, Client, ClientError, ClientFactory, EntityDescriptor,
    EntityManagerFactory, FetchType, JoinTable, JoinTableData, MetadataRegistry, Record,
    RelationDescriptor, Row, Value,
};

// ============================================================================
// Recording client
// ============================================================================

/// One call received by a [`RecordingClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Persist { entity: String, row: Row },
    Find { entity: String, key: Value },
    FindByRelation { entity: String, column: String, value: Value },
    FindByColumns { entity: String },
    FindJoinKeys { table: String, owner: Value },
    Merge { entity: String, key: Value, row: Row },
    Remove { entity: String, key: Value },
    DeleteByColumn { table: String, column: String, value: Value },
    PersistJoinTable { table: String, rows: Vec<(Value, Value)> },
    Close,
}

impl Call {
    /// Short label such as `persist Person`.
    pub fn label(&self) -> String {
        match self {
            Call::Persist { entity, .. } => format!("persist {}", entity),
            Call::Find { entity, .. } => format!("find {}", entity),
            Call::FindByRelation { entity, .. } => format!("find_by_relation {}", entity),
            Call::FindByColumns { entity } => format!("find_by_columns {}", entity),
            Call::FindJoinKeys { table, .. } => format!("find_join_keys {}", table),
            Call::Merge { entity, .. } => format!("merge {}", entity),
            Call::Remove { entity, .. } => format!("remove {}", entity),
            Call::DeleteByColumn { table, .. } => format!("delete_by_column {}", table),
            Call::PersistJoinTable { table, .. } => format!("persist_join_table {}", table),
            Call::Close => "close".to_string(),
        }
    }
}

/// In-process client that stores rows and records every call.
#[derive(Default)]
pub struct RecordingClient {
    unit: String,
    tables: Mutex<HashMap<String, BTreeMap<String, Row>>>,
    joins: Mutex<HashMap<String, Vec<(Value, Value)>>>,
    sequence: AtomicI64,
    calls: Mutex<Vec<Call>>,
    /// Entity names whose writes fail
    failing: Mutex<Vec<String>>,
    /// Join tables whose writes fail
    failing_joins: Mutex<Vec<String>>,
}

impl RecordingClient {
    pub fn new(unit: &str) -> Arc<Self> {
        Arc::new(Self {
            unit: unit.to_string(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls.lock().iter().map(Call::label).collect()
    }

    /// Labels of write calls only.
    pub fn writes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::Persist { .. }
                        | Call::Merge { .. }
                        | Call::Remove { .. }
                        | Call::DeleteByColumn { .. }
                        | Call::PersistJoinTable { .. }
                )
            })
            .map(Call::label)
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_writes_for(&self, entity: &str) {
        self.failing.lock().push(entity.to_string());
    }

    pub fn fail_join_table(&self, table: &str) {
        self.failing_joins.lock().push(table.to_string());
    }

    /// Stored row of `table` for `key`.
    pub fn row(&self, table: &str, key: impl Into<Value>) -> Option<Row> {
        let key = key.into().as_key()?;
        self.tables.lock().get(table).and_then(|t| t.get(&key).cloned())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    pub fn join_rows(&self, table: &str) -> Vec<(Value, Value)> {
        self.joins.lock().get(table).cloned().unwrap_or_default()
    }

    /// Store a row directly, bypassing the call log.
    pub fn seed(&self, table: &str, key: impl Into<Value>, row: Row) {
        let key = key.into().as_key().unwrap();
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    pub fn seed_join(&self, table: &str, owner: impl Into<Value>, inverse: impl Into<Value>) {
        self.joins
            .lock()
            .entry(table.to_string())
            .or_default()
            .push((owner.into(), inverse.into()));
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check_failure(&self, entity: &str) -> Result<(), ClientError> {
        if self.failing.lock().iter().any(|e| e == entity) {
            return Err(ClientError::storage(format!("{} writes are disabled", entity)));
        }
        Ok(())
    }

    fn key_of(entity: &EntityDescriptor, key: &Value) -> Result<String, ClientError> {
        key.as_key()
            .ok_or_else(|| ClientError::invalid_key(&entity.name, "not a key"))
    }
}

impl Client for RecordingClient {
    fn persistence_unit(&self) -> &str {
        &self.unit
    }

    fn persist(&self, entity: &EntityDescriptor, row: &Row) -> Result<Value, ClientError> {
        self.record(Call::Persist {
            entity: entity.name.clone(),
            row: row.clone(),
        });
        self.check_failure(&entity.name)?;

        let key = match row.get(&entity.id_column) {
            Some(key) if !key.is_null() => key.clone(),
            _ => Value::Int(self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let mut stored = row.clone();
        stored.insert(entity.id_column.clone(), key.clone());
        self.tables
            .lock()
            .entry(entity.table.clone())
            .or_default()
            .insert(Self::key_of(entity, &key)?, stored);
        Ok(key)
    }

    fn find(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Row>, ClientError> {
        self.record(Call::Find {
            entity: entity.name.clone(),
            key: key.clone(),
        });
        let key = Self::key_of(entity, key)?;
        Ok(self
            .tables
            .lock()
            .get(&entity.table)
            .and_then(|t| t.get(&key).cloned()))
    }

    fn find_by_relation(
        &self,
        entity: &EntityDescriptor,
        join_column: &str,
        value: &Value,
    ) -> Result<Vec<Row>, ClientError> {
        self.record(Call::FindByRelation {
            entity: entity.name.clone(),
            column: join_column.to_string(),
            value: value.clone(),
        });
        Ok(self
            .tables
            .lock()
            .get(&entity.table)
            .map(|t| {
                t.values()
                    .filter(|row| row.get(join_column) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_by_columns(&self, entity: &EntityDescriptor, columns: &Row) -> Result<Vec<Row>, ClientError> {
        self.record(Call::FindByColumns {
            entity: entity.name.clone(),
        });
        Ok(self
            .tables
            .lock()
            .get(&entity.table)
            .map(|t| {
                t.values()
                    .filter(|row| columns.iter().all(|(c, v)| row.get(c) == Some(v)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_join_keys(&self, join_table: &JoinTable, owner: &Value) -> Result<Vec<Value>, ClientError> {
        self.record(Call::FindJoinKeys {
            table: join_table.table.clone(),
            owner: owner.clone(),
        });
        Ok(self
            .join_rows(&join_table.table)
            .into_iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, inverse)| inverse)
            .collect())
    }

    fn merge(&self, entity: &EntityDescriptor, key: &Value, row: &Row) -> Result<(), ClientError> {
        self.record(Call::Merge {
            entity: entity.name.clone(),
            key: key.clone(),
            row: row.clone(),
        });
        self.check_failure(&entity.name)?;
        let mut stored = row.clone();
        stored.insert(entity.id_column.clone(), key.clone());
        self.tables
            .lock()
            .entry(entity.table.clone())
            .or_default()
            .insert(Self::key_of(entity, key)?, stored);
        Ok(())
    }

    fn remove(&self, entity: &EntityDescriptor, key: &Value) -> Result<(), ClientError> {
        self.record(Call::Remove {
            entity: entity.name.clone(),
            key: key.clone(),
        });
        self.check_failure(&entity.name)?;
        let key = Self::key_of(entity, key)?;
        if let Some(table) = self.tables.lock().get_mut(&entity.table) {
            table.remove(&key);
        }
        Ok(())
    }

    fn delete_by_column(&self, table: &str, column: &str, value: &Value) -> Result<usize, ClientError> {
        self.record(Call::DeleteByColumn {
            table: table.to_string(),
            column: column.to_string(),
            value: value.clone(),
        });
        if self.failing_joins.lock().iter().any(|t| t == table) {
            return Err(ClientError::storage(format!("{} is read-only", table)));
        }
        let mut joins = self.joins.lock();
        let Some(rows) = joins.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|(owner, _)| owner != value);
        Ok(before - rows.len())
    }

    fn persist_join_table(&self, data: &JoinTableData) -> Result<(), ClientError> {
        let table = data.join_table.table.clone();
        self.record(Call::PersistJoinTable {
            table: table.clone(),
            rows: data.rows().to_vec(),
        });
        if self.failing_joins.lock().iter().any(|t| *t == table) {
            return Err(ClientError::storage(format!("{} is read-only", table)));
        }
        let mut joins = self.joins.lock();
        let rows = joins.entry(table).or_default();
        for row in data.rows() {
            if !rows.contains(row) {
                rows.push(row.clone());
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), ClientError> {
        self.record(Call::Close);
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Serves fixed clients by unit name.
#[derive(Default)]
pub struct StaticFactory {
    clients: HashMap<String, Arc<RecordingClient>>,
}

impl StaticFactory {
    pub fn with(mut self, unit: &str, client: Arc<RecordingClient>) -> Self {
        self.clients.insert(unit.to_string(), client);
        self
    }
}

impl ClientFactory for StaticFactory {
    fn create(&self, unit: &str) -> Result<Arc<dyn Client>, ClientError> {
        self.clients
            .get(unit)
            .map(|c| Arc::clone(c) as Arc<dyn Client>)
            .ok_or_else(|| ClientError::unknown_unit(unit))
    }
}

// ============================================================================
// Schema fixtures
// ============================================================================

/// People with addresses, phones, clubs and mentors; all in the `main` unit.
///
/// - `Person.address`: one-to-one, join column `address_id`, cascade all
/// - `Person.phones`: one-to-many, join column `person_id`, cascade all
/// - `Person.clubs`: many-to-many through `memberships`, cascade persist/merge
/// - `Person.mentor`: many-to-one self reference, join column `mentor_id`,
///   cascade persist/merge
/// - `Address` ids are generated by the store
pub fn people_registry() -> MetadataRegistry {
    MetadataRegistry::with_default_unit("main")
        .with(
            EntityDescriptor::builder("Person")
                .table("people")
                .id("person_id")
                .column("name")
                .relation(
                    RelationDescriptor::one_to_one("address", "Address")
                        .join_column("address_id")
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::one_to_many("phones", "Phone")
                        .join_column("person_id")
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::many_to_many("clubs", "Club")
                        .join_table(JoinTable::new("memberships", "person_id", "club_id"))
                        .cascade(CascadeSet::of(&[CascadeType::Persist, CascadeType::Merge])),
                )
                .relation(
                    RelationDescriptor::many_to_one("mentor", "Person")
                        .join_column("mentor_id")
                        .cascade(CascadeSet::of(&[CascadeType::Persist, CascadeType::Merge])),
                )
                .build(),
        )
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Address")
                    .table("addresses")
                    .generated_id("address_id")
                    .column("city")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Phone")
                    .table("phones")
                    .id("phone_id")
                    .column("number")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Club")
                    .table("clubs")
                    .id("club_id")
                    .column("title")
                    .relation(
                        RelationDescriptor::many_to_many("members", "Person").mapped_by("clubs"),
                    )
                    .build(),
            )
        })
        .expect("people schema is valid")
}

/// Same schema as [`people_registry`] with every relation of `Person`
/// fetched eagerly.
pub fn eager_people_registry() -> MetadataRegistry {
    MetadataRegistry::with_default_unit("main")
        .with(
            EntityDescriptor::builder("Person")
                .table("people")
                .id("person_id")
                .column("name")
                .relation(
                    RelationDescriptor::one_to_one("address", "Address")
                        .join_column("address_id")
                        .fetch(FetchType::Eager)
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::one_to_many("phones", "Phone")
                        .join_column("person_id")
                        .fetch(FetchType::Eager)
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::many_to_many("clubs", "Club")
                        .join_table(JoinTable::new("memberships", "person_id", "club_id"))
                        .fetch(FetchType::Eager),
                )
                .relation(
                    RelationDescriptor::many_to_one("mentor", "Person")
                        .join_column("mentor_id")
                        .fetch(FetchType::Eager),
                )
                .build(),
        )
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Address")
                    .table("addresses")
                    .generated_id("address_id")
                    .column("city")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Phone")
                    .table("phones")
                    .id("phone_id")
                    .column("number")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Club")
                    .table("clubs")
                    .id("club_id")
                    .column("title")
                    .build(),
            )
        })
        .expect("eager people schema is valid")
}

/// Factory over [`people_registry`] with one recording client for `main`.
pub fn people_factory() -> (EntityManagerFactory, Arc<RecordingClient>) {
    let client = RecordingClient::new("main");
    let factory = EntityManagerFactory::new(
        people_registry(),
        Arc::new(StaticFactory::default().with("main", Arc::clone(&client))),
    );
    (factory, client)
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn person(id: &str, name: &str) -> Record {
    Record::new("Person").with("person_id", id).with("name", name)
}
