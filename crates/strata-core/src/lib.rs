//! Strata Core - unit-of-work persistence over pluggable backend clients
//!
//! This crate maps graphs of related records onto one or more backing
//! stores:
//! - Entity descriptors and a validating metadata registry
//! - Object graphs built from a root record, deduplicated by identity
//! - The node lifecycle (Transient, Managed, Removed, Detached)
//! - Dependency-ordered flush plans with join-table operations
//! - A shared, lock-guarded cache of head entities
//! - The [`EntityManager`] orchestrating all of the above
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata_core::{CascadeSet, EntityDescriptor, EntityManagerFactory, MetadataRegistry};
//! use strata_core::{Record, RelationDescriptor};
//!
//! let registry = MetadataRegistry::new()
//!     .with(
//!         EntityDescriptor::builder("Person")
//!             .id("person_id")
//!             .column("name")
//!             .relation(
//!                 RelationDescriptor::one_to_one("address", "Address")
//!                     .join_column("address_id")
//!                     .cascade(CascadeSet::ALL),
//!             )
//!             .build(),
//!     )?
//!     .with(EntityDescriptor::builder("Address").generated_id("address_id").column("city").build())?;
//!
//! let factory = EntityManagerFactory::new(registry, Arc::new(my_client_factory));
//! let em = factory.create_entity_manager();
//!
//! let person = em.persist(
//!     Record::new("Person")
//!         .with("person_id", "p1")
//!         .with("name", "Ada")
//!         .with_one("address", Record::new("Address").with("city", "Turin")),
//! )?;
//! assert!(em.find("Person", "p1")?.is_some());
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod event;
pub mod flush;
pub mod graph;
pub mod manager;
pub mod metadata;
pub mod reader;
pub mod value;

// Re-exports for convenience
pub use cache::{MainCache, PersistenceCache};
pub use client::{Client, ClientFactory, ClientMap, DEFAULT_UNIT};
pub use error::{BoxError, ClientError, PersistenceError, Result};
pub use event::{EntityListener, EventDispatcher, LifecycleEvent};
pub use flush::{
    FlushExecutor, FlushPlan, FlushReport, FlushStack, JoinTableData, JoinTableOperation,
};
pub use graph::{
    EntityKey, FlushAction, Node, NodeId, NodeLink, NodeState, ObjectGraph, ObjectGraphBuilder,
    Operation, PreparedRow,
};
pub use manager::{EntityManager, EntityManagerFactory};
pub use metadata::{
    CascadeSet, CascadeType, EntityDescriptor, EntityDescriptorBuilder, FetchType, IdGeneration,
    JoinTable, MetadataRegistry, RelationDescriptor, RelationKind,
};
pub use reader::EntityReader;
pub use value::{Record, Related, Row, Value};

pub use strata_config::FlushMode;
