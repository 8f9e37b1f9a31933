//! Registry of entity descriptors, validated once at registration.

use crate::error::{PersistenceError, Result};
use crate::metadata::descriptor::{EntityDescriptor, RelationKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Read-only lookup of entity schemas by type name.
///
/// Populated at startup and shared behind an `Arc` afterwards.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    default_unit: Option<String>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that assigns `unit` to descriptors without a persistence unit.
    pub fn with_default_unit(unit: impl Into<String>) -> Self {
        Self {
            entities: HashMap::new(),
            default_unit: Some(unit.into()),
        }
    }

    pub fn default_unit(&self) -> Option<&str> {
        self.default_unit.as_deref()
    }

    /// Validate and add a descriptor.
    pub fn register(&mut self, mut descriptor: EntityDescriptor) -> Result<()> {
        validate(&descriptor)?;

        if self.entities.contains_key(&descriptor.name) {
            return Err(PersistenceError::invalid_descriptor(
                &descriptor.name,
                "entity type is already registered",
            ));
        }

        if descriptor.persistence_unit.is_none() {
            descriptor.persistence_unit = self.default_unit.clone();
        }

        debug!(
            "Registered entity {} (table {}, unit {:?}, {} relations)",
            descriptor.name,
            descriptor.table,
            descriptor.persistence_unit,
            descriptor.relations.len()
        );
        self.entities
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, descriptor: EntityDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Look up a descriptor, failing with `MetadataMissing`.
    pub fn entity(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| PersistenceError::metadata_missing(name))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Check that every relation target is registered.
    ///
    /// Registration order is free, so this runs once all descriptors are in.
    pub fn validate_targets(&self) -> Result<()> {
        for descriptor in self.entities.values() {
            for relation in &descriptor.relations {
                if !self.entities.contains_key(&relation.target) {
                    return Err(PersistenceError::relation_configuration(
                        &descriptor.name,
                        &relation.field,
                        format!("target entity '{}' is not registered", relation.target),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate(descriptor: &EntityDescriptor) -> Result<()> {
    if descriptor.name.trim().is_empty() {
        return Err(PersistenceError::invalid_descriptor(
            &descriptor.name,
            "entity name must not be empty",
        ));
    }
    if descriptor.id_column.trim().is_empty() {
        return Err(PersistenceError::invalid_descriptor(
            &descriptor.name,
            "identifier column must not be empty",
        ));
    }

    let mut fields = HashSet::new();
    for relation in &descriptor.relations {
        let fail = |message: &str| {
            Err(PersistenceError::relation_configuration(
                &descriptor.name,
                &relation.field,
                message,
            ))
        };

        if !fields.insert(relation.field.as_str()) {
            return fail("relation field declared twice");
        }

        match relation.kind {
            RelationKind::ManyToMany => {
                if relation.join_column.is_some() {
                    return fail("join column is not allowed on many-to-many, use a join table");
                }
                if relation.join_table.is_none() && relation.mapped_by.is_none() {
                    return fail("many-to-many requires a join table or mapped_by");
                }
            }
            _ => {
                if relation.join_table.is_some() {
                    return fail("join table is only allowed on many-to-many");
                }
            }
        }

        if relation.join_column.is_some() && relation.mapped_by.is_some() {
            return fail("inverse side (mapped_by) cannot declare a join column");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::descriptor::{JoinTable, RelationDescriptor};

    fn person() -> EntityDescriptor {
        EntityDescriptor::builder("Person")
            .id("person_id")
            .column("name")
            .relation(RelationDescriptor::one_to_one("address", "Address").join_column("address_id"))
            .build()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = MetadataRegistry::new();
        registry.register(person()).unwrap();

        assert!(registry.contains("Person"));
        assert_eq!(registry.entity("Person").unwrap().id_column, "person_id");
        assert!(matches!(
            registry.entity("Ghost"),
            Err(PersistenceError::MetadataMissing { .. })
        ));
    }

    #[test]
    fn test_default_unit_applied() {
        let mut registry = MetadataRegistry::with_default_unit("main");
        registry.register(person()).unwrap();
        registry
            .register(EntityDescriptor::builder("Address").unit("geo").build())
            .unwrap();

        assert_eq!(registry.entity("Person").unwrap().unit(), Some("main"));
        assert_eq!(registry.entity("Address").unwrap().unit(), Some("geo"));
    }

    #[test]
    fn test_many_to_many_requires_join_table() {
        let mut registry = MetadataRegistry::new();
        let err = registry
            .register(
                EntityDescriptor::builder("Post")
                    .relation(RelationDescriptor::many_to_many("tags", "Tag"))
                    .build(),
            )
            .unwrap_err();

        assert!(matches!(err, PersistenceError::RelationConfiguration { .. }));
        assert!(err.to_string().contains("Post.tags"));
    }

    #[test]
    fn test_many_to_many_rejects_join_column() {
        let mut registry = MetadataRegistry::new();
        let err = registry
            .register(
                EntityDescriptor::builder("Post")
                    .relation(
                        RelationDescriptor::many_to_many("tags", "Tag")
                            .join_column("tag_id")
                            .join_table(JoinTable::new("post_tags", "post_id", "tag_id")),
                    )
                    .build(),
            )
            .unwrap_err();

        assert!(matches!(err, PersistenceError::RelationConfiguration { .. }));
    }

    #[test]
    fn test_inverse_many_to_many_accepted() {
        let mut registry = MetadataRegistry::new();
        registry
            .register(
                EntityDescriptor::builder("Tag")
                    .relation(RelationDescriptor::many_to_many("posts", "Post").mapped_by("tags"))
                    .build(),
            )
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = MetadataRegistry::new();
        registry.register(person()).unwrap();
        let err = registry.register(person()).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_validate_targets() {
        let mut registry = MetadataRegistry::new();
        registry.register(person()).unwrap();
        assert!(registry.validate_targets().is_err());

        registry
            .register(EntityDescriptor::builder("Address").build())
            .unwrap();
        assert!(registry.validate_targets().is_ok());
    }
}
