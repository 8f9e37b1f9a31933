//! Unit-of-work node: one entity instance with its lifecycle state.

use crate::error::ClientError;
use crate::metadata::EntityDescriptor;
use crate::value::{Record, Row, Value};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identity
// ============================================================================

/// Key part of a node identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    /// Known primary key
    Assigned(String),
    /// Store-generated key not yet known; unique within one object graph
    Pending(u64),
}

/// Identity of an entity instance: type name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    entity: String,
    key: EntityKey,
}

impl NodeId {
    pub fn assigned(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: EntityKey::Assigned(key.into()),
        }
    }

    pub fn pending(entity: impl Into<String>, seq: u64) -> Self {
        Self {
            entity: entity.into(),
            key: EntityKey::Pending(seq),
        }
    }

    /// Identity for a key value; `None` when the value cannot identify a row.
    ///
    /// Built from [`Value::as_key`], so text and integer keys with the same
    /// canonical string are one identity.
    pub fn from_value(entity: impl Into<String>, key: &Value) -> Option<Self> {
        key.as_key().map(|k| Self::assigned(entity, k))
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, EntityKey::Pending(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            EntityKey::Assigned(key) => write!(f, "{}${}", self.entity, key),
            EntityKey::Pending(seq) => write!(f, "{}$<pending:{}>", self.entity, seq),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Not yet associated with the store
    Transient,
    /// Tracked and in sync with (or about to be written to) the store
    Managed,
    /// Scheduled for or already deleted; terminal for writes
    Removed,
    /// Known to the store but no longer tracked
    Detached,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Transient => "transient",
            NodeState::Managed => "managed",
            NodeState::Removed => "removed",
            NodeState::Detached => "detached",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend write recorded by a state transition, consumed by the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushAction {
    Insert,
    Update,
    Delete,
}

// ============================================================================
// Node
// ============================================================================

/// One entity instance tracked by a unit of work.
///
/// Relations to other nodes live in the owning
/// [`ObjectGraph`](crate::graph::ObjectGraph) as links.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    /// Key as stored; `Null` while the key is pending
    key: Value,
    state: NodeState,
    data: Record,
    descriptor: Arc<EntityDescriptor>,
    dirty: bool,
    head: bool,
    action: Option<FlushAction>,
}

impl Node {
    pub fn new(
        id: NodeId,
        key: Value,
        data: Record,
        descriptor: Arc<EntityDescriptor>,
        state: NodeState,
    ) -> Self {
        Self {
            id,
            key,
            state,
            data,
            descriptor,
            dirty: false,
            head: false,
            action: None,
        }
    }

    /// Managed node for data just read from the store.
    pub fn found(id: NodeId, key: Value, data: Record, descriptor: Arc<EntityDescriptor>) -> Self {
        Self::new(id, key, data, descriptor, NodeState::Managed)
    }

    /// Managed node for a row read from the store, keeping the identifier
    /// and declared columns.
    pub fn from_row(descriptor: Arc<EntityDescriptor>, key: &Value, row: &Row) -> Result<Self, ClientError> {
        let Some(id) = NodeId::from_value(&descriptor.name, key) else {
            return Err(ClientError::invalid_key(
                &descriptor.name,
                format!("{} value cannot identify a row", key.type_name()),
            ));
        };

        let mut data = Record::new(&descriptor.name);
        for column in descriptor.stored_columns() {
            if let Some(value) = row.get(column) {
                data.set(column, value.clone());
            }
        }
        // Some stores do not echo the key back in the row
        if data.get(&descriptor.id_column).is_none() {
            data.set(&descriptor.id_column, key.clone());
        }

        Ok(Self::found(id, key.clone(), data, descriptor))
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn into_data(self) -> Record {
        self.data
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn persistence_unit(&self) -> Option<&str> {
        self.descriptor.unit()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_head(&self) -> bool {
        self.head
    }

    pub fn pending_action(&self) -> Option<FlushAction> {
        self.action
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub(crate) fn set_head(&mut self, head: bool) {
        self.head = head;
    }

    pub(crate) fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub(crate) fn set_action(&mut self, action: Option<FlushAction>) {
        self.action = action;
    }

    pub(crate) fn replace_data(&mut self, data: Record) {
        self.data = data;
    }

    /// Adopt the key the store reported for this node.
    ///
    /// Replaces a pending identity and writes the key into the identifier
    /// column of the node's data.
    pub(crate) fn resolve_key(&mut self, key: Value) {
        if let Some(id) = NodeId::from_value(&self.descriptor.name, &key) {
            self.id = id;
        }
        self.data.set(&self.descriptor.id_column, key.clone());
        self.key = key;
    }

    /// Copy suitable for the shared cache: head, clean, nothing pending.
    pub(crate) fn to_cached(&self, data: Record) -> Self {
        Self {
            id: self.id.clone(),
            key: self.key.clone(),
            state: self.state,
            data,
            descriptor: Arc::clone(&self.descriptor),
            dirty: false,
            head: true,
            action: None,
        }
    }
}
