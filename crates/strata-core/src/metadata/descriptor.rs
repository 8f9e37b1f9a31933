//! Static entity schema: identifier, columns and relations.

use serde::{Deserialize, Serialize};

// ============================================================================
// Relation Metadata
// ============================================================================

/// Cardinality of a relation, seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    /// Single-valued relations (one-to-one, many-to-one).
    pub fn is_unary(&self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one-to-one",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation that may cascade along a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeType {
    Persist,
    Merge,
    Remove,
}

/// Set of cascade types carried by a relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CascadeSet {
    pub persist: bool,
    pub merge: bool,
    pub remove: bool,
}

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet {
        persist: false,
        merge: false,
        remove: false,
    };

    pub const ALL: CascadeSet = CascadeSet {
        persist: true,
        merge: true,
        remove: true,
    };

    pub fn of(types: &[CascadeType]) -> Self {
        types.iter().fold(Self::NONE, |set, &t| set.with(t))
    }

    pub fn with(mut self, cascade: CascadeType) -> Self {
        match cascade {
            CascadeType::Persist => self.persist = true,
            CascadeType::Merge => self.merge = true,
            CascadeType::Remove => self.remove = true,
        }
        self
    }

    pub fn contains(&self, cascade: CascadeType) -> bool {
        match cascade {
            CascadeType::Persist => self.persist,
            CascadeType::Merge => self.merge,
            CascadeType::Remove => self.remove,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.persist || self.merge || self.remove)
    }
}

/// When related entities are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    #[default]
    Lazy,
    Eager,
}

/// Join table backing a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinTable {
    /// Table name
    pub table: String,
    /// Column holding the owning entity's key
    pub join_column: String,
    /// Column holding the related entity's key
    pub inverse_join_column: String,
}

impl JoinTable {
    pub fn new(
        table: impl Into<String>,
        join_column: impl Into<String>,
        inverse_join_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            join_column: join_column.into(),
            inverse_join_column: inverse_join_column.into(),
        }
    }
}

/// One declared relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Relation field name on the declaring entity
    pub field: String,
    /// Target entity type name
    pub target: String,
    pub kind: RelationKind,
    pub cascade: CascadeSet,
    pub fetch: FetchType,
    /// Foreign-key column.
    ///
    /// For unary relations it lives on the declaring entity's table; for
    /// one-to-many it lives on the target's table.
    pub join_column: Option<String>,
    /// Join table (many-to-many owner side only)
    pub join_table: Option<JoinTable>,
    /// Field on the target that owns this relation (inverse side)
    pub mapped_by: Option<String>,
}

impl RelationDescriptor {
    fn new(field: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind,
            cascade: CascadeSet::NONE,
            fetch: FetchType::Lazy,
            join_column: None,
            join_table: None,
            mapped_by: None,
        }
    }

    pub fn one_to_one(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(field, target, RelationKind::OneToOne)
    }

    pub fn many_to_one(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(field, target, RelationKind::ManyToOne)
    }

    pub fn one_to_many(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(field, target, RelationKind::OneToMany)
    }

    pub fn many_to_many(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(field, target, RelationKind::ManyToMany)
    }

    pub fn cascade(mut self, cascade: CascadeSet) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn fetch(mut self, fetch: FetchType) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn join_column(mut self, column: impl Into<String>) -> Self {
        self.join_column = Some(column.into());
        self
    }

    pub fn join_table(mut self, join_table: JoinTable) -> Self {
        self.join_table = Some(join_table);
        self
    }

    pub fn mapped_by(mut self, field: impl Into<String>) -> Self {
        self.mapped_by = Some(field.into());
        self
    }

    /// Owning side of a join-table relation (rows are written from here).
    pub fn owns_join_table(&self) -> bool {
        self.kind == RelationKind::ManyToMany && self.join_table.is_some() && self.mapped_by.is_none()
    }
}

// ============================================================================
// Entity Metadata
// ============================================================================

/// How identifier values come into existence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdGeneration {
    /// Caller supplies the identifier
    #[default]
    Assigned,
    /// Store assigns the identifier on insert
    Generated,
}

/// Schema of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type name
    pub name: String,
    /// Table (or collection) name in the backing store
    pub table: String,
    /// Persistence unit holding this entity
    pub persistence_unit: Option<String>,
    pub id_column: String,
    pub id_generation: IdGeneration,
    /// Non-identifier columns
    pub columns: Vec<String>,
    pub relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder::new(name)
    }

    pub fn relation(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.field == field)
    }

    pub fn is_generated_id(&self) -> bool {
        self.id_generation == IdGeneration::Generated
    }

    /// True when a relation points back at this entity type.
    pub fn is_self_referential(&self) -> bool {
        self.relations.iter().any(|r| r.target == self.name)
    }

    pub fn unit(&self) -> Option<&str> {
        self.persistence_unit.as_deref()
    }

    /// Identifier plus declared columns, in declaration order.
    pub fn stored_columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id_column.as_str()).chain(self.columns.iter().map(String::as_str))
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            descriptor: EntityDescriptor {
                table: name.to_lowercase(),
                name,
                persistence_unit: None,
                id_column: "id".to_string(),
                id_generation: IdGeneration::Assigned,
                columns: Vec::new(),
                relations: Vec::new(),
            },
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.descriptor.table = table.into();
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.descriptor.persistence_unit = Some(unit.into());
        self
    }

    /// Caller-assigned identifier column.
    pub fn id(mut self, column: impl Into<String>) -> Self {
        self.descriptor.id_column = column.into();
        self.descriptor.id_generation = IdGeneration::Assigned;
        self
    }

    /// Store-generated identifier column.
    pub fn generated_id(mut self, column: impl Into<String>) -> Self {
        self.descriptor.id_column = column.into();
        self.descriptor.id_generation = IdGeneration::Generated;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.descriptor.columns.push(column.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .columns
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.descriptor.relations.push(relation);
        self
    }

    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}
