//! Entity metadata.
//!
//! Descriptors are declared up front and registered once; the rest of the
//! engine reads them through [`MetadataRegistry`].

mod descriptor;
mod registry;

pub use descriptor::{
    CascadeSet, CascadeType, EntityDescriptor, EntityDescriptorBuilder, FetchType, IdGeneration,
    JoinTable, RelationDescriptor, RelationKind,
};
pub use registry::MetadataRegistry;
