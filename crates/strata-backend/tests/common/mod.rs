//! Shared fixtures for backend integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use strata_backend::{ClientRegistry, InMemoryClient, SqliteClient};
use strata_config::StrataConfig;
use strata_core::{
    CascadeSet, Client, CascadeType, EntityDescriptor, EntityManagerFactory, FetchType, JoinTable,
    MetadataRegistry, Record, RelationDescriptor,
};
use tempfile::TempDir;

/// Authors and tags live in `main`; profiles and books live in `docs`.
///
/// - `Author.profile`: one-to-one, join column `profile_id`, cascade all
/// - `Author.books`: one-to-many, join column `author_id`, cascade all
/// - `Author.tags`: many-to-many through `author_tags`, cascade persist/merge
/// - `Profile` ids are generated by the store
pub fn library_registry() -> MetadataRegistry {
    MetadataRegistry::with_default_unit("main")
        .with(
            EntityDescriptor::builder("Author")
                .table("authors")
                .id("author_id")
                .column("name")
                .relation(
                    RelationDescriptor::one_to_one("profile", "Profile")
                        .join_column("profile_id")
                        .fetch(FetchType::Eager)
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::one_to_many("books", "Book")
                        .join_column("author_id")
                        .fetch(FetchType::Eager)
                        .cascade(CascadeSet::ALL),
                )
                .relation(
                    RelationDescriptor::many_to_many("tags", "Tag")
                        .join_table(JoinTable::new("author_tags", "author_id", "tag_id"))
                        .fetch(FetchType::Eager)
                        .cascade(CascadeSet::of(&[CascadeType::Persist, CascadeType::Merge])),
                )
                .build(),
        )
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Profile")
                    .table("profiles")
                    .unit("docs")
                    .generated_id("profile_id")
                    .column("bio")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Book")
                    .table("books")
                    .unit("docs")
                    .id("book_id")
                    .column("title")
                    .build(),
            )
        })
        .and_then(|r| {
            r.with(
                EntityDescriptor::builder("Tag")
                    .table("tags")
                    .id("tag_id")
                    .column("label")
                    .build(),
            )
        })
        .expect("library schema is valid")
}

/// A SQLite `main` unit in a temporary directory and an in-memory `docs`
/// unit, wired into a factory.
pub struct Library {
    pub factory: EntityManagerFactory,
    pub main: Arc<SqliteClient>,
    pub docs: Arc<InMemoryClient>,
    pub dir: TempDir,
}

impl Library {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let main = Arc::new(SqliteClient::open("main", dir.path().join("main.db")).unwrap());
        let docs = Arc::new(InMemoryClient::new("docs"));
        let factory = factory_over(&dir, &main, &docs);
        Self {
            factory,
            main,
            docs,
            dir,
        }
    }

    /// Another factory over the same stores, with an empty cache.
    pub fn fresh_factory(&self) -> EntityManagerFactory {
        factory_over(&self.dir, &self.main, &self.docs)
    }
}

fn factory_over(dir: &TempDir, main: &Arc<SqliteClient>, docs: &Arc<InMemoryClient>) -> EntityManagerFactory {
    let clients = ClientRegistry::new(StrataConfig::default(), dir.path());
    clients.register("main", Arc::clone(main) as Arc<dyn Client>);
    clients.register("docs", Arc::clone(docs) as Arc<dyn Client>);
    EntityManagerFactory::new(library_registry(), Arc::new(clients))
}

pub fn author(id: &str, name: &str) -> Record {
    Record::new("Author").with("author_id", id).with("name", name)
}

pub fn book(id: &str, title: &str) -> Record {
    Record::new("Book").with("book_id", id).with("title", title)
}

pub fn tag(id: &str) -> Record {
    Record::new("Tag").with("tag_id", id).with("label", id)
}

pub fn profile(bio: &str) -> Record {
    Record::new("Profile").with("bio", bio)
}

/// Author `a1` with a profile, two books and two tags.
pub fn full_author() -> Record {
    author("a1", "Ursula")
        .with_one("profile", profile("Writes about islands"))
        .with_many(
            "books",
            vec![book("b1", "A Wizard of Earthsea"), book("b2", "The Dispossessed")],
        )
        .with_many("tags", vec![tag("fantasy"), tag("scifi")])
}
