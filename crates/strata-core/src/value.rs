//! Dynamic entity data: column values, rows and records.
//!
//! A [`Record`] is one entity instance as the engine sees it: the entity type
//! name, the column values (identifier included) and the related records
//! reachable through declared relations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column values keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical identity string for key-capable values.
    ///
    /// Only `Text` and `Int` can identify an entity. The kind is not part of
    /// the key: `Text("1")` and `Int(1)` both map to `"1"` and name the same
    /// entity, in the cache as well as in the stores.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Runtime value of a relation field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Related {
    /// Single-valued relation (one-to-one, many-to-one)
    One(Box<Record>),
    /// Collection relation (one-to-many, many-to-many)
    Many(Vec<Record>),
}

impl Related {
    /// Iterate the related records, in collection order.
    pub fn records(&self) -> std::slice::Iter<'_, Record> {
        match self {
            Related::One(record) => std::slice::from_ref(record.as_ref()).iter(),
            Related::Many(records) => records.iter(),
        }
    }

    pub fn records_mut(&mut self) -> std::slice::IterMut<'_, Record> {
        match self {
            Related::One(record) => std::slice::from_mut(record.as_mut()).iter_mut(),
            Related::Many(records) => records.iter_mut(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(_) => 1,
            Related::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    entity: String,
    fields: Row,
    relations: BTreeMap<String, Related>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: Row::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Build a record from a stored row.
    pub fn from_row(entity: impl Into<String>, fields: Row) -> Self {
        Self {
            entity: entity.into(),
            fields,
            relations: BTreeMap::new(),
        }
    }

    /// Set a column value (builder style).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a single-valued relation (builder style).
    pub fn with_one(mut self, relation: impl Into<String>, record: Record) -> Self {
        self.relations
            .insert(relation.into(), Related::One(Box::new(record)));
        self
    }

    /// Set a collection relation (builder style).
    pub fn with_many(mut self, relation: impl Into<String>, records: Vec<Record>) -> Self {
        self.relations
            .insert(relation.into(), Related::Many(records));
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    pub fn related_mut(&mut self, relation: &str) -> Option<&mut Related> {
        self.relations.get_mut(relation)
    }

    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub fn set_related(&mut self, relation: impl Into<String>, related: Related) {
        self.relations.insert(relation.into(), related);
    }

    /// Drop a relation value, making it null.
    pub fn clear_related(&mut self, relation: &str) -> Option<Related> {
        self.relations.remove(relation)
    }
}
