//! Reads entities through backend clients, loading eager relations.

use crate::client::ClientMap;
use crate::error::{PersistenceError, Result};
use crate::graph::{Node, NodeId};
use crate::metadata::{
    EntityDescriptor, FetchType, JoinTable, MetadataRegistry, RelationDescriptor, RelationKind,
};
use crate::value::{Record, Related, Row, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

/// Turns stored rows into records.
///
/// Relations declared [`FetchType::Eager`] are loaded recursively. An
/// identity already on the current load path is attached without loading
/// its own relations again, so cyclic schemas terminate.
pub struct EntityReader<'a> {
    registry: &'a MetadataRegistry,
    clients: &'a ClientMap,
}

impl<'a> EntityReader<'a> {
    pub fn new(registry: &'a MetadataRegistry, clients: &'a ClientMap) -> Self {
        Self { registry, clients }
    }

    /// Fetch one entity as a Managed head node.
    pub fn find(&self, entity: &str, key: &Value) -> Result<Option<Node>> {
        let descriptor = self.registry.entity(entity)?;
        let client = self.clients.for_entity(&descriptor)?;
        let Some(row) = client.find(&descriptor, key)? else {
            trace!("{} '{}' not found", entity, key);
            return Ok(None);
        };

        let mut node = Node::from_row(Arc::clone(&descriptor), key, &row)?;
        let mut path = HashSet::from([node.id().clone()]);
        let mut data = node.data().clone();
        self.load_eager(&descriptor, &row, &mut data, &mut path)?;
        node.replace_data(data);
        Ok(Some(node))
    }

    /// Records whose `join_column` equals `value`.
    pub fn find_by_relation(&self, entity: &str, join_column: &str, value: &Value) -> Result<Vec<Record>> {
        let descriptor = self.registry.entity(entity)?;
        let client = self.clients.for_entity(&descriptor)?;
        let rows = client.find_by_relation(&descriptor, join_column, value)?;
        self.rows_to_records(&descriptor, rows)
    }

    /// Records matching every column value in `columns`.
    pub fn find_by_columns(&self, entity: &str, columns: &Row) -> Result<Vec<Record>> {
        let descriptor = self.registry.entity(entity)?;
        for column in columns.keys() {
            if !descriptor.stored_columns().any(|c| c == column)
                && !descriptor.relations.iter().any(|r| r.join_column.as_deref() == Some(column.as_str()))
            {
                return Err(PersistenceError::invalid_descriptor(
                    &descriptor.name,
                    format!("'{}' is not a stored column", column),
                ));
            }
        }
        let client = self.clients.for_entity(&descriptor)?;
        let rows = client.find_by_columns(&descriptor, columns)?;
        self.rows_to_records(&descriptor, rows)
    }

    pub fn rows_to_records(&self, descriptor: &Arc<EntityDescriptor>, rows: Vec<Row>) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut path = HashSet::new();
            if let Some(record) = self.load_row(descriptor, &row, &mut path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn load_row(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        row: &Row,
        path: &mut HashSet<NodeId>,
    ) -> Result<Option<Record>> {
        let Some(key) = row.get(&descriptor.id_column).filter(|k| !k.is_null()) else {
            warn!("Skipping {} row without '{}'", descriptor.name, descriptor.id_column);
            return Ok(None);
        };
        let node = Node::from_row(Arc::clone(descriptor), key, row)?;
        let id = node.id().clone();
        let mut record = node.into_data();

        if path.insert(id.clone()) {
            self.load_eager(descriptor, row, &mut record, path)?;
            path.remove(&id);
        }
        Ok(Some(record))
    }

    fn load_by_key(
        &self,
        descriptor: &Arc<EntityDescriptor>,
        key: &Value,
        path: &mut HashSet<NodeId>,
    ) -> Result<Option<Record>> {
        let client = self.clients.for_entity(descriptor)?;
        match client.find(descriptor, key)? {
            Some(row) => self.load_row(descriptor, &row, path),
            None => Ok(None),
        }
    }

    fn load_eager(
        &self,
        descriptor: &EntityDescriptor,
        row: &Row,
        record: &mut Record,
        path: &mut HashSet<NodeId>,
    ) -> Result<()> {
        let Some(own_key) = record.get(&descriptor.id_column).cloned() else {
            return Ok(());
        };

        for relation in descriptor.relations.iter().filter(|r| r.fetch == FetchType::Eager) {
            let target = self.registry.entity(&relation.target)?;
            let related = match relation.kind {
                RelationKind::OneToOne | RelationKind::ManyToOne => {
                    self.load_unary(descriptor, relation, &target, row, &own_key, path)?
                }
                RelationKind::OneToMany => {
                    let column = self.foreign_key_column(descriptor, relation, &target)?;
                    let client = self.clients.for_entity(&target)?;
                    let rows = client.find_by_relation(&target, &column, &own_key)?;
                    let mut children = Vec::with_capacity(rows.len());
                    for child in rows {
                        if let Some(record) = self.load_row(&target, &child, path)? {
                            children.push(record);
                        }
                    }
                    Some(Related::Many(children))
                }
                RelationKind::ManyToMany => {
                    let join_table = self.join_table(descriptor, relation, &target)?;
                    let client = self.clients.for_entity(descriptor)?;
                    let keys = client.find_join_keys(&join_table, &own_key)?;
                    let mut children = Vec::with_capacity(keys.len());
                    for key in keys {
                        if let Some(record) = self.load_by_key(&target, &key, path)? {
                            children.push(record);
                        }
                    }
                    Some(Related::Many(children))
                }
            };
            if let Some(related) = related {
                record.set_related(&relation.field, related);
            }
        }
        Ok(())
    }

    fn load_unary(
        &self,
        descriptor: &EntityDescriptor,
        relation: &RelationDescriptor,
        target: &Arc<EntityDescriptor>,
        row: &Row,
        own_key: &Value,
        path: &mut HashSet<NodeId>,
    ) -> Result<Option<Related>> {
        let child = match (&relation.join_column, &relation.mapped_by) {
            (Some(column), None) => match row.get(column).filter(|v| !v.is_null()) {
                Some(foreign_key) => self.load_by_key(target, foreign_key, path)?,
                None => None,
            },
            (_, Some(_)) => {
                // Inverse side: the target row holds our key
                let column = self.foreign_key_column(descriptor, relation, target)?;
                let client = self.clients.for_entity(target)?;
                match client.find_by_relation(target, &column, own_key)?.first() {
                    Some(child) => self.load_row(target, child, path)?,
                    None => None,
                }
            }
            (None, None) => None,
        };
        Ok(child.map(|record| Related::One(Box::new(record))))
    }

    /// Column of the target table that holds the declaring entity's key.
    fn foreign_key_column(
        &self,
        descriptor: &EntityDescriptor,
        relation: &RelationDescriptor,
        target: &EntityDescriptor,
    ) -> Result<String> {
        let column = match relation.mapped_by {
            Some(ref owner_field) => target
                .relation(owner_field)
                .and_then(|owner| owner.join_column.clone()),
            None => relation.join_column.clone(),
        };
        column.ok_or_else(|| {
            PersistenceError::relation_configuration(
                &descriptor.name,
                &relation.field,
                "no join column to load through",
            )
        })
    }

    /// Join table as seen from the declaring side.
    fn join_table(
        &self,
        descriptor: &EntityDescriptor,
        relation: &RelationDescriptor,
        target: &EntityDescriptor,
    ) -> Result<JoinTable> {
        if let Some(ref join_table) = relation.join_table {
            return Ok(join_table.clone());
        }
        relation
            .mapped_by
            .as_deref()
            .and_then(|owner_field| target.relation(owner_field))
            .and_then(|owner| owner.join_table.as_ref())
            .map(|owned| {
                JoinTable::new(
                    owned.table.clone(),
                    owned.inverse_join_column.clone(),
                    owned.join_column.clone(),
                )
            })
            .ok_or_else(|| {
                PersistenceError::relation_configuration(
                    &descriptor.name,
                    &relation.field,
                    "no join table to load through",
                )
            })
    }
}
