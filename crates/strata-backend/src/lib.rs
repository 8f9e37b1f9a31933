//! Strata Backend - Concrete backend clients and their registry
//!
//! This crate provides:
//! - [`InMemoryClient`]: process-local tables, handy for tests and scratch units
//! - [`SqliteClient`]: rows stored as JSON documents in a SQLite database
//! - [`ClientRegistry`]: a [`ClientFactory`](strata_core::ClientFactory) that
//!   opens clients from `[units.<name>]` configuration, one per unit
//!
//! ## Example
//!
//! ```ignore
//! use strata_backend::ClientRegistry;
//! use strata_core::{EntityManagerFactory, MetadataRegistry};
//! use std::sync::Arc;
//!
//! let clients = ClientRegistry::load("/path/to/project", None)?;
//! let config = clients.config().clone();
//! let factory = EntityManagerFactory::from_config(
//!     MetadataRegistry::with_default_unit("main"),
//!     Arc::new(clients),
//!     &config,
//! );
//! let em = factory.create_entity_manager();
//! ```

mod error;
mod memory;
mod registry;
mod schema;
mod sqlite;

pub use error::BackendError;
pub use memory::InMemoryClient;
pub use registry::ClientRegistry;
pub use sqlite::SqliteClient;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
