//! SQLite backend client.
//!
//! Rows are stored as JSON documents; column lookups use `json_extract`, so
//! entity tables need no DDL of their own. The database may be a file or
//! in-memory.

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{
    Client, ClientError, EntityDescriptor, JoinTable, JoinTableData, JoinTableOperation, Row,
    Value,
};
use tracing::{debug, info, trace};

use crate::error::BackendError;
use crate::schema::{
    SCHEMA_CREATE_ENTITIES, SCHEMA_CREATE_JOIN_ROWS, SCHEMA_CREATE_METADATA,
    SCHEMA_CREATE_SEQUENCES, SCHEMA_VERSION,
};

/// Backend client over a single SQLite connection.
pub struct SqliteClient {
    unit: String,
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteClient {
    /// Open (or create) a database file.
    pub fn open(unit: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| BackendError::open(path, e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let unit = unit.into();
        info!("Opened SQLite unit '{}' at {}", unit, path.display());
        Self::init(unit, Some(path.to_path_buf()), conn)
    }

    /// Create a private in-memory database.
    pub fn in_memory(unit: impl Into<String>) -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init(unit.into(), None, conn)
    }

    fn init(unit: String, path: Option<PathBuf>, conn: Connection) -> Result<Self, BackendError> {
        conn.execute(SCHEMA_CREATE_ENTITIES, [])?;
        conn.execute(SCHEMA_CREATE_JOIN_ROWS, [])?;
        conn.execute(SCHEMA_CREATE_SEQUENCES, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;

        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM strata_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match version {
            Some(found) if found != SCHEMA_VERSION => {
                return Err(BackendError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION.to_string(),
                    found,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO strata_metadata (key, value) VALUES ('schema_version', ?1)",
                    [SCHEMA_VERSION],
                )?;
            }
        }

        Ok(Self {
            unit,
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of rows stored under `table` (entity or join table).
    pub fn row_count(&self, table: &str) -> Result<usize, BackendError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM entities WHERE table_name = ?1)
                  + (SELECT COUNT(*) FROM join_rows WHERE table_name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Row operations
    // =========================================================================

    fn insert_row(
        &self,
        entity: &EntityDescriptor,
        assigned: Option<(Value, String)>,
        row: &Row,
    ) -> Result<Value, BackendError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let (key, id) = match assigned {
            Some(assigned) => assigned,
            None => {
                let next = next_id(&tx, &entity.table)?;
                (Value::Int(next), next.to_string())
            }
        };
        write_row(&tx, entity, &key, &id, row)?;
        tx.commit()?;

        trace!("{}: persist {}[{}]", self.unit, entity.table, id);
        Ok(key)
    }

    fn replace_row(
        &self,
        entity: &EntityDescriptor,
        key: &Value,
        id: &str,
        row: &Row,
    ) -> Result<(), BackendError> {
        let conn = self.conn.lock();
        write_row(&conn, entity, key, id, row)?;
        trace!("{}: merge {}[{}]", self.unit, entity.table, id);
        Ok(())
    }

    fn select_row(&self, table: &str, id: &str) -> Result<Option<Row>, BackendError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT row_json FROM entities WHERE table_name = ?1 AND id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(BackendError::from)
    }

    fn select_matching(&self, table: &str, columns: &Row) -> Result<Vec<Row>, BackendError> {
        let mut sql = String::from("SELECT row_json FROM entities WHERE table_name = ?1");
        let mut args = vec![SqlValue::Text(table.to_string())];
        for (column, value) in columns {
            args.push(SqlValue::Text(json_path(column)));
            args.push(sql_value(value)?);
            sql.push_str(&format!(
                " AND json_extract(row_json, ?{}) IS ?{}",
                args.len() - 1,
                args.len()
            ));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let documents = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        decode_rows(&documents)
    }

    fn select_join_keys(&self, join_table: &JoinTable, owner: &Value) -> Result<Vec<Value>, BackendError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT row_json FROM join_rows
             WHERE table_name = ?1 AND json_extract(row_json, ?2) IS ?3
             ORDER BY rowid",
        )?;
        let documents = stmt
            .query_map(
                params![
                    join_table.table,
                    json_path(&join_table.join_column),
                    sql_value(owner)?
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(decode_rows(&documents)?
            .into_iter()
            .filter_map(|mut row| row.remove(&join_table.inverse_join_column))
            .collect())
    }

    fn delete_row(&self, table: &str, id: &str) -> Result<(), BackendError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM entities WHERE table_name = ?1 AND id = ?2",
            params![table, id],
        )?;
        Ok(())
    }

    fn delete_matching(&self, table: &str, column: &str, value: &Value) -> Result<usize, BackendError> {
        let path = json_path(column);
        let value = sql_value(value)?;
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let mut deleted = tx.execute(
            "DELETE FROM entities WHERE table_name = ?1 AND json_extract(row_json, ?2) IS ?3",
            params![table, path, value],
        )?;
        deleted += tx.execute(
            "DELETE FROM join_rows WHERE table_name = ?1 AND json_extract(row_json, ?2) IS ?3",
            params![table, path, value],
        )?;
        tx.commit()?;
        debug!("{}: deleted {} rows from {} where {}", self.unit, deleted, table, column);
        Ok(deleted)
    }

    fn write_join_rows(&self, data: &JoinTableData) -> Result<(), BackendError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let sql = match data.operation {
                JoinTableOperation::Insert => {
                    "INSERT OR IGNORE INTO join_rows (table_name, row_json) VALUES (?1, ?2)"
                }
                JoinTableOperation::Delete => {
                    "DELETE FROM join_rows WHERE table_name = ?1 AND row_json = ?2"
                }
            };
            let mut stmt = tx.prepare(sql)?;
            for (owner, inverse) in data.rows() {
                let mut row = Row::new();
                row.insert(data.join_table.join_column.clone(), owner.clone());
                row.insert(data.join_table.inverse_join_column.clone(), inverse.clone());
                stmt.execute(params![data.join_table.table, serde_json::to_string(&row)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteClient")
            .field("unit", &self.unit)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn next_id(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO sequences (table_name, next_value) VALUES (?1, 1)
         ON CONFLICT(table_name) DO UPDATE SET next_value = next_value + 1",
        [table],
    )?;
    conn.query_row(
        "SELECT next_value FROM sequences WHERE table_name = ?1",
        [table],
        |row| row.get(0),
    )
}

fn write_row(
    conn: &Connection,
    entity: &EntityDescriptor,
    key: &Value,
    id: &str,
    row: &Row,
) -> Result<(), BackendError> {
    let mut stored = row.clone();
    stored.insert(entity.id_column.clone(), key.clone());
    conn.execute(
        "INSERT OR REPLACE INTO entities (table_name, id, row_json) VALUES (?1, ?2, ?3)",
        params![entity.table, id, serde_json::to_string(&stored)?],
    )?;
    Ok(())
}

fn decode_rows(documents: &[String]) -> Result<Vec<Row>, BackendError> {
    documents
        .iter()
        .map(|json| serde_json::from_str(json).map_err(BackendError::from))
        .collect()
}

/// JSON path selecting a top-level column.
fn json_path(column: &str) -> String {
    format!("$.\"{}\"", column.replace('"', "\\\""))
}

/// SQL value comparable with what `json_extract` returns for `value`.
fn sql_value(value: &Value) -> Result<SqlValue, BackendError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        // Arrays come back from json_extract as their JSON text
        Value::Bytes(bytes) => SqlValue::Text(serde_json::to_string(bytes)?),
    })
}

fn key_string(entity: &EntityDescriptor, key: &Value) -> Result<String, ClientError> {
    key.as_key().ok_or_else(|| {
        ClientError::invalid_key(
            &entity.name,
            format!("{} value cannot be used as a key", key.type_name()),
        )
    })
}

impl Client for SqliteClient {
    fn persistence_unit(&self) -> &str {
        &self.unit
    }

    fn persist(&self, entity: &EntityDescriptor, row: &Row) -> Result<Value, ClientError> {
        let assigned = match row.get(&entity.id_column) {
            Some(key) if !key.is_null() => Some((key.clone(), key_string(entity, key)?)),
            _ if entity.is_generated_id() => None,
            _ => {
                return Err(ClientError::invalid_key(
                    &entity.name,
                    format!("row has no '{}' value", entity.id_column),
                ))
            }
        };
        Ok(self.insert_row(entity, assigned, row)?)
    }

    fn find(&self, entity: &EntityDescriptor, key: &Value) -> Result<Option<Row>, ClientError> {
        let id = key_string(entity, key)?;
        Ok(self.select_row(&entity.table, &id)?)
    }

    fn find_by_relation(
        &self,
        entity: &EntityDescriptor,
        join_column: &str,
        value: &Value,
    ) -> Result<Vec<Row>, ClientError> {
        let mut columns = Row::new();
        columns.insert(join_column.to_string(), value.clone());
        Ok(self.select_matching(&entity.table, &columns)?)
    }

    fn find_by_columns(&self, entity: &EntityDescriptor, columns: &Row) -> Result<Vec<Row>, ClientError> {
        Ok(self.select_matching(&entity.table, columns)?)
    }

    fn find_join_keys(&self, join_table: &JoinTable, owner: &Value) -> Result<Vec<Value>, ClientError> {
        Ok(self.select_join_keys(join_table, owner)?)
    }

    fn merge(&self, entity: &EntityDescriptor, key: &Value, row: &Row) -> Result<(), ClientError> {
        let id = key_string(entity, key)?;
        Ok(self.replace_row(entity, key, &id, row)?)
    }

    fn remove(&self, entity: &EntityDescriptor, key: &Value) -> Result<(), ClientError> {
        let id = key_string(entity, key)?;
        Ok(self.delete_row(&entity.table, &id)?)
    }

    fn delete_by_column(&self, table: &str, column: &str, value: &Value) -> Result<usize, ClientError> {
        Ok(self.delete_matching(table, column, value)?)
    }

    fn persist_join_table(&self, data: &JoinTableData) -> Result<(), ClientError> {
        Ok(self.write_join_rows(data)?)
    }

    fn close(&self) -> Result<(), ClientError> {
        debug!("Session closed on SQLite unit '{}'", self.unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn people() -> EntityDescriptor {
        EntityDescriptor::builder("Person")
            .table("people")
            .id("person_id")
            .columns(["name", "active", "score"])
            .build()
    }

    fn addresses() -> EntityDescriptor {
        EntityDescriptor::builder("Address")
            .table("addresses")
            .generated_id("address_id")
            .column("city")
            .build()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_persist_and_find_keeps_value_types() {
        let client = SqliteClient::in_memory("main").unwrap();
        let stored = row(&[
            ("person_id", "p1".into()),
            ("name", "Ada".into()),
            ("active", true.into()),
            ("score", 9.5.into()),
            ("address_id", Value::Int(3)),
        ]);
        client.persist(&people(), &stored).unwrap();

        let found = client.find(&people(), &"p1".into()).unwrap().unwrap();
        assert_eq!(found, stored);
    }

    #[test]
    fn test_generated_keys() {
        let client = SqliteClient::in_memory("main").unwrap();
        let first = client
            .persist(&addresses(), &row(&[("city", "Turin".into())]))
            .unwrap();
        let second = client
            .persist(&addresses(), &row(&[("city", "Oslo".into())]))
            .unwrap();

        assert_eq!(first, Value::Int(1));
        assert_eq!(second, Value::Int(2));
        let found = client.find(&addresses(), &Value::Int(2)).unwrap().unwrap();
        assert_eq!(found.get("address_id"), Some(&Value::Int(2)));
        assert_eq!(found.get("city"), Some(&Value::from("Oslo")));
    }

    #[test]
    fn test_invalid_key() {
        let client = SqliteClient::in_memory("main").unwrap();
        let err = client.find(&people(), &Value::Float(1.5)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidKey { .. }));

        let err = client
            .persist(&people(), &row(&[("name", "Ada".into())]))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidKey { .. }));
    }

    #[test]
    fn test_find_by_columns_matches_types() {
        let client = SqliteClient::in_memory("main").unwrap();
        for (id, name, active) in [("p1", "Ada", true), ("p2", "Grace", false), ("p3", "Alan", true)] {
            client
                .persist(
                    &people(),
                    &row(&[
                        ("person_id", id.into()),
                        ("name", name.into()),
                        ("active", active.into()),
                        ("mentor_id", Value::Null),
                    ]),
                )
                .unwrap();
        }

        let active = client
            .find_by_columns(&people(), &row(&[("active", true.into())]))
            .unwrap();
        let names: Vec<_> = active.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![Value::from("Ada"), Value::from("Alan")]);

        let none = client
            .find_by_columns(
                &people(),
                &row(&[("active", true.into()), ("name", "Grace".into())]),
            )
            .unwrap();
        assert!(none.is_empty());

        // Null matches both explicit nulls and absent columns
        let unmentored = client
            .find_by_relation(&people(), "mentor_id", &Value::Null)
            .unwrap();
        assert_eq!(unmentored.len(), 3);
    }

    #[test]
    fn test_merge_and_remove() {
        let client = SqliteClient::in_memory("main").unwrap();
        client
            .persist(&people(), &row(&[("person_id", "p1".into()), ("name", "Ada".into())]))
            .unwrap();
        client
            .merge(&people(), &"p1".into(), &row(&[("name", "Ada Lovelace".into())]))
            .unwrap();
        assert_eq!(
            client.find(&people(), &"p1".into()).unwrap().unwrap().get("name"),
            Some(&Value::from("Ada Lovelace"))
        );

        client.remove(&people(), &"p1".into()).unwrap();
        assert!(client.find(&people(), &"p1".into()).unwrap().is_none());
        assert_eq!(client.row_count("people").unwrap(), 0);
    }

    #[test]
    fn test_join_rows() {
        let client = SqliteClient::in_memory("main").unwrap();
        let memberships = JoinTable::new("memberships", "person_id", "club_id");
        let mut data = JoinTableData::new(memberships.clone(), JoinTableOperation::Insert);
        data.add_row("p1".into(), "chess".into());
        data.add_row("p1".into(), "go".into());
        data.add_row("p2".into(), "go".into());
        client.persist_join_table(&data).unwrap();
        client.persist_join_table(&data).unwrap();

        assert_eq!(client.row_count("memberships").unwrap(), 3);
        assert_eq!(
            client.find_join_keys(&memberships, &"p1".into()).unwrap(),
            vec![Value::from("chess"), Value::from("go")]
        );
        let inverse = JoinTable::new("memberships", "club_id", "person_id");
        assert_eq!(
            client.find_join_keys(&inverse, &"go".into()).unwrap(),
            vec![Value::from("p1"), Value::from("p2")]
        );

        let mut delete = JoinTableData::new(memberships.clone(), JoinTableOperation::Delete);
        delete.add_row("p1".into(), "go".into());
        client.persist_join_table(&delete).unwrap();
        assert_eq!(
            client
                .delete_by_column("memberships", "person_id", &"p1".into())
                .unwrap(),
            1
        );
        assert_eq!(client.row_count("memberships").unwrap(), 1);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("main.db");
        {
            let client = SqliteClient::open("main", &path).unwrap();
            client
                .persist(&addresses(), &row(&[("city", "Turin".into())]))
                .unwrap();
        }

        let client = SqliteClient::open("main", &path).unwrap();
        assert_eq!(client.path(), Some(path.as_path()));
        assert!(client.find(&addresses(), &Value::Int(1)).unwrap().is_some());
        // The sequence continues after reopening
        let key = client
            .persist(&addresses(), &row(&[("city", "Oslo".into())]))
            .unwrap();
        assert_eq!(key, Value::Int(2));
    }

    #[test]
    fn test_schema_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(SCHEMA_CREATE_METADATA, []).unwrap();
            conn.execute(
                "INSERT INTO strata_metadata (key, value) VALUES ('schema_version', '0')",
                [],
            )
            .unwrap();
        }

        let err = SqliteClient::open("main", &path).unwrap_err();
        assert!(matches!(err, BackendError::SchemaVersionMismatch { .. }));
    }
}
