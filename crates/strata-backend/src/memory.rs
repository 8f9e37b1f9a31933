//! Process-local backend client.
//!
//! Entity tables hold rows keyed by the canonical key string; join tables
//! hold rows of `{join_column: owner, inverse_join_column: inverse}`.
//! Generated keys come from a per-table integer sequence.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use strata_core::{
    Client, ClientError, EntityDescriptor, JoinTable, JoinTableData, JoinTableOperation, Row,
    Value,
};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<String, Row>>,
    join_tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
}

impl MemoryState {
    fn next_id(&mut self, table: &str) -> i64 {
        let next = self.sequences.entry(table.to_string()).or_insert(0);
        *next += 1;
        *next
    }
}

/// Backend client keeping every table in memory.
///
/// One instance is shared by all entity managers of a persistence unit; rows
/// live as long as the instance does.
#[derive(Debug)]
pub struct InMemoryClient {
    unit: String,
    state: RwLock<MemoryState>,
}

impl InMemoryClient {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of rows stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.read();
        state
            .tables
            .get(table)
            .map(BTreeMap::len)
            .or_else(|| state.join_tables.get(table).map(Vec::len))
            .unwrap_or(0)
    }

    /// Drop every table and sequence.
    pub fn truncate(&self) {
        let mut state = self.state.write();
        state.tables.clear();
        state.join_tables.clear();
        state.sequences.clear();
    }
}

fn key_string(entity: &EntityDescriptor, key: &Value) -> Result<String, ClientError> {
    key.as_key().ok_or_else(|| {
        ClientError::invalid_key(
            &entity.name,
            format!("{} value cannot be used as a key", key.type_name()),
        )
    })
}

fn matches(row: &Row, columns: &Row) -> bool {
    columns
        .iter()
        .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
}

fn join_row(join_table: &JoinTable, owner: &Value, inverse: &Value) -> Row {
    let mut row = Row::new();
    row.insert(join_table.join_column.clone(), owner.clone());
    row.insert(join_table.inverse_join_column.clone(), inverse.clone());
    row
}

impl Client for InMemoryClient {
    fn persistence_unit(&self) -> &str {
        &self.unit
    }

    fn persist(&self, entity: &EntityDescriptor, row: &Row) -> Result<Value, ClientError> {
        let mut state = self.state.write();
        let key = match row.get(&entity.id_column) {
            Some(key) if !key.is_null() => key.clone(),
            _ if entity.is_generated_id() => Value::Int(state.next_id(&entity.table)),
            _ => {
                return Err(ClientError::invalid_key(
                    &entity.name,
                    format!("row has no '{}' value", entity.id_column),
                ))
            }
        };

        let mut stored = row.clone();
        stored.insert(entity.id_column.clone(), key.clone());
        let id = key_string(entity, &key)?;
        trace!("{}: persist {}[{}]", self.unit, entity.table, id);
        state
            .tables
            .entry(entity.table.clone())
            .or_default()
            .insert(id, stored);
        Ok(key)
    }

    fn find(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Row>, ClientError> {
        let id = key_string(entity, key)?;
        Ok(self
            .state
            .read()
            .tables
            .get(&entity.table)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    fn find_by_relation(
        &self,
        entity: &EntityDescriptor,
        join_column: &str,
        value: &Value,
    ) -> Result<Vec<Row>, ClientError> {
        let state = self.state.read();
        let Some(table) = state.tables.get(&entity.table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|row| row.get(join_column) == Some(value))
            .cloned()
            .collect())
    }

    fn find_by_columns(&self, entity: &EntityDescriptor, columns: &Row) -> Result<Vec<Row>, ClientError> {
        let state = self.state.read();
        let Some(table) = state.tables.get(&entity.table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|row| matches(row, columns))
            .cloned()
            .collect())
    }

    fn find_join_keys(&self, join_table: &JoinTable, owner: &Value) -> Result<Vec<Value>, ClientError> {
        let state = self.state.read();
        let Some(rows) = state.join_tables.get(&join_table.table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| row.get(&join_table.join_column) == Some(owner))
            .filter_map(|row| row.get(&join_table.inverse_join_column).cloned())
            .collect())
    }

    fn merge(&self, entity: &EntityDescriptor, key: &Value, row: &Row) -> Result<(), ClientError> {
        let id = key_string(entity, key)?;
        let mut stored = row.clone();
        stored.insert(entity.id_column.clone(), key.clone());
        trace!("{}: merge {}[{}]", self.unit, entity.table, id);
        self.state
            .write()
            .tables
            .entry(entity.table.clone())
            .or_default()
            .insert(id, stored);
        Ok(())
    }

    fn remove(&self, entity: &EntityDescriptor, key: &Value) -> Result<(), ClientError> {
        let id = key_string(entity, key)?;
        if let Some(table) = self.state.write().tables.get_mut(&entity.table) {
            table.remove(&id);
        }
        Ok(())
    }

    fn delete_by_column(&self, table: &str, column: &str, value: &Value) -> Result<usize, ClientError> {
        let mut state = self.state.write();
        let mut deleted = 0;
        if let Some(rows) = state.tables.get_mut(table) {
            let before = rows.len();
            rows.retain(|_, row| row.get(column) != Some(value));
            deleted += before - rows.len();
        }
        if let Some(rows) = state.join_tables.get_mut(table) {
            let before = rows.len();
            rows.retain(|row| row.get(column) != Some(value));
            deleted += before - rows.len();
        }
        debug!("{}: deleted {} rows from {} where {} = {}", self.unit, deleted, table, column, value);
        Ok(deleted)
    }

    fn persist_join_table(&self, data: &JoinTableData) -> Result<(), ClientError> {
        let mut state = self.state.write();
        let rows = state
            .join_tables
            .entry(data.join_table.table.clone())
            .or_default();
        for (owner, inverse) in data.rows() {
            let row = join_row(&data.join_table, owner, inverse);
            match data.operation {
                JoinTableOperation::Insert => {
                    if !rows.contains(&row) {
                        rows.push(row);
                    }
                }
                JoinTableOperation::Delete => rows.retain(|existing| *existing != row),
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), ClientError> {
        debug!("Session closed on in-memory unit '{}'", self.unit);
        Ok(())
    }
}
