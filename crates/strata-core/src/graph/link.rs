//! Typed edge between two nodes.

use crate::metadata::{CascadeSet, CascadeType, JoinTable, RelationDescriptor, RelationKind};
use crate::value::Value;

/// Directed link from the node declaring a relation to one related node.
///
/// Carries the relation's cascade and foreign-key metadata and, once the
/// target has flushed, the resolved key value.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLink {
    /// Relation field on the source entity
    pub relation: String,
    /// Position within a collection relation (0 for unary relations)
    pub ordinal: usize,
    pub kind: RelationKind,
    pub cascade: CascadeSet,
    pub join_column: Option<String>,
    pub join_table: Option<JoinTable>,
    pub mapped_by: Option<String>,
    /// Relation targets the source's own entity type
    pub self_referential: bool,
    source_key: Option<Value>,
    target_key: Option<Value>,
}

impl NodeLink {
    pub fn from_relation(relation: &RelationDescriptor, ordinal: usize, self_referential: bool) -> Self {
        Self {
            relation: relation.field.clone(),
            ordinal,
            kind: relation.kind,
            cascade: relation.cascade,
            join_column: relation.join_column.clone(),
            join_table: relation.join_table.clone(),
            mapped_by: relation.mapped_by.clone(),
            self_referential,
            source_key: None,
            target_key: None,
        }
    }

    /// Resolved foreign-key value; `None` until the referenced node has flushed.
    ///
    /// The referenced node is the source for one-to-many links (the target
    /// row holds the key) and the target otherwise.
    pub fn value(&self) -> Option<&Value> {
        if self.target_holds_key() {
            self.source_key.as_ref()
        } else {
            self.target_key.as_ref()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.value().is_some()
    }

    /// Key recorded when the source node flushed.
    pub fn source_key(&self) -> Option<&Value> {
        self.source_key.as_ref()
    }

    /// Key recorded when the target node flushed.
    pub fn target_key(&self) -> Option<&Value> {
        self.target_key.as_ref()
    }

    pub(crate) fn set_source_key(&mut self, key: Value) {
        self.source_key = Some(key);
    }

    pub(crate) fn set_target_key(&mut self, key: Value) {
        self.target_key = Some(key);
    }

    pub fn cascades(&self, cascade: CascadeType) -> bool {
        self.cascade.contains(cascade)
    }

    /// Source row carries the target's key in `join_column`.
    pub fn source_holds_key(&self) -> bool {
        self.kind.is_unary() && self.join_column.is_some() && self.mapped_by.is_none()
    }

    /// Target row carries the source's key in `join_column`.
    pub fn target_holds_key(&self) -> bool {
        self.kind == RelationKind::OneToMany && self.join_column.is_some() && self.mapped_by.is_none()
    }

    /// Association is written as join-table rows from the source side.
    pub fn owns_join_table(&self) -> bool {
        self.kind == RelationKind::ManyToMany && self.join_table.is_some() && self.mapped_by.is_none()
    }
}
