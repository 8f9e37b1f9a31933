//! Error types for the persistence engine.

use crate::graph::{NodeId, NodeState, Operation};
use crate::event::LifecycleEvent;
use thiserror::Error;

/// Boxed backend failure carried by [`ClientError::Storage`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by backend clients.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No client is configured for the persistence unit
    #[error("persistence unit '{unit}' is not configured")]
    UnknownUnit { unit: String },

    /// Key value cannot identify a row
    #[error("invalid key for '{entity}': {message}")]
    InvalidKey { entity: String, message: String },

    /// Row to update or delete does not exist
    #[error("{entity} '{key}' not found")]
    NotFound { entity: String, key: String },

    /// Client was closed
    #[error("client for unit '{unit}' is closed")]
    Closed { unit: String },

    /// Underlying store failed
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
}

impl ClientError {
    /// Create an UnknownUnit error.
    pub fn unknown_unit(unit: impl Into<String>) -> Self {
        Self::UnknownUnit { unit: unit.into() }
    }

    /// Create an InvalidKey error.
    pub fn invalid_key(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    /// Create a Closed error.
    pub fn closed(unit: impl Into<String>) -> Self {
        Self::Closed { unit: unit.into() }
    }

    /// Wrap a store-specific error.
    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }
}

/// Errors surfaced by entity manager operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Object graph could not be built from the root record
    #[error("cannot build object graph for '{entity}': {message}")]
    GraphConstruction { entity: String, message: String },

    /// Entity type has no registered descriptor
    #[error("no metadata registered for entity type '{entity}'")]
    MetadataMissing { entity: String },

    /// Descriptor is unusable
    #[error("invalid descriptor for '{entity}': {message}")]
    InvalidDescriptor { entity: String, message: String },

    /// Operation not allowed in the node's current state
    #[error("cannot {operation} {node}: node is {state}")]
    InvalidState {
        node: NodeId,
        state: NodeState,
        operation: Operation,
    },

    /// Persistence unit could not be mapped to a client
    #[error("cannot resolve client for persistence unit '{unit}': {source}")]
    ClientResolution {
        unit: String,
        #[source]
        source: ClientError,
    },

    /// A node's backend write failed; earlier writes of the plan stay applied
    #[error("flush failed at {node}: {source}")]
    Flush {
        node: NodeId,
        #[source]
        source: ClientError,
    },

    /// Relation metadata is inconsistent
    #[error("invalid relation '{entity}.{relation}': {message}")]
    RelationConfiguration {
        entity: String,
        relation: String,
        message: String,
    },

    /// Lifecycle listener rejected the operation
    #[error("{event} listener rejected '{entity}': {message}")]
    Listener {
        event: LifecycleEvent,
        entity: String,
        message: String,
    },

    /// Backend read failed
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Entity manager was closed
    #[error("entity manager is closed")]
    SessionClosed,
}

impl PersistenceError {
    /// Create a GraphConstruction error.
    pub fn graph_construction(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GraphConstruction {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a MetadataMissing error.
    pub fn metadata_missing(entity: impl Into<String>) -> Self {
        Self::MetadataMissing {
            entity: entity.into(),
        }
    }

    /// Create an InvalidDescriptor error.
    pub fn invalid_descriptor(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidState error.
    pub fn invalid_state(node: NodeId, state: NodeState, operation: Operation) -> Self {
        Self::InvalidState {
            node,
            state,
            operation,
        }
    }

    /// Create a ClientResolution error.
    pub fn client_resolution(unit: impl Into<String>, source: ClientError) -> Self {
        Self::ClientResolution {
            unit: unit.into(),
            source,
        }
    }

    /// Create a Flush error.
    pub fn flush(node: NodeId, source: ClientError) -> Self {
        Self::Flush { node, source }
    }

    /// Create a RelationConfiguration error.
    pub fn relation_configuration(
        entity: impl Into<String>,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RelationConfiguration {
            entity: entity.into(),
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// Create a Listener error.
    pub fn listener(
        event: LifecycleEvent,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Listener {
            event,
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Result type for entity manager operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = PersistenceError::metadata_missing("Invoice");
        assert_eq!(
            err.to_string(),
            "no metadata registered for entity type 'Invoice'"
        );

        let err = PersistenceError::invalid_state(
            NodeId::assigned("Person", "p1"),
            NodeState::Removed,
            Operation::Persist,
        );
        assert_eq!(err.to_string(), "cannot persist Person$p1: node is removed");
    }

    #[test]
    fn test_flush_error_keeps_cause() {
        let err = PersistenceError::flush(
            NodeId::assigned("Address", "a1"),
            ClientError::not_found("Address", "a1"),
        );

        assert!(err.to_string().contains("Address$a1"));
        let source = err.source().unwrap();
        assert!(source.to_string().contains("not found"));
    }

    #[test]
    fn test_client_resolution_error() {
        let err = PersistenceError::client_resolution(
            "archive",
            ClientError::unknown_unit("archive"),
        );
        assert!(err.to_string().contains("archive"));
        assert!(matches!(err, PersistenceError::ClientResolution { .. }));
    }
}
