//! Polyglot Persistence Tests
//!
//! These tests run the entity manager over real backend clients, with one
//! object graph spread across two persistence units:
//! - `main`: a SQLite database file (authors, tags, the author/tag join table)
//! - `docs`: an in-memory store (profiles, books)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package strata-backend --test polyglot
//! ```

mod common;

use common::{author, book, full_author, library_registry, tag, Library};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use strata_backend::{ClientRegistry, SqliteClient};
use strata_config::ConfigLoader;
use strata_core::{
    Client, EntityDescriptor, EntityManagerFactory, MetadataRegistry, Record, Related, Value,
};
use tempfile::TempDir;

fn labels(record: &Record, relation: &str, column: &str) -> Vec<Value> {
    let mut values: Vec<Value> = record
        .related(relation)
        .map(|related| {
            related
                .records()
                .filter_map(|r| r.get(column).cloned())
                .collect()
        })
        .unwrap_or_default();
    values.sort_by_key(|v| v.to_string());
    values
}

// ============================================================================
// Writes across units
// ============================================================================

#[test]
fn test_persist_spans_units() {
    let library = Library::new();
    let em = library.factory.create_entity_manager();

    let saved = em.persist(full_author()).unwrap();

    assert_eq!(library.main.row_count("authors").unwrap(), 1);
    assert_eq!(library.main.row_count("tags").unwrap(), 2);
    assert_eq!(library.main.row_count("author_tags").unwrap(), 2);
    assert_eq!(library.docs.row_count("profiles"), 1);
    assert_eq!(library.docs.row_count("books"), 2);

    // The generated profile key from `docs` lands in the author row in `main`
    let authors = library.factory.registry().entity("Author").unwrap();
    let row = library.main.find(&authors, &"a1".into()).unwrap().unwrap();
    assert_eq!(row.get("profile_id"), Some(&Value::Int(1)));

    let books = library.factory.registry().entity("Book").unwrap();
    let owned = library
        .docs
        .find_by_relation(&books, "author_id", &"a1".into())
        .unwrap();
    assert_eq!(owned.len(), 2);

    let profile = saved.related("profile").unwrap().records().next().unwrap();
    assert_eq!(profile.get("profile_id"), Some(&Value::Int(1)));
}

#[test]
fn test_fresh_factory_reads_eagerly_across_units() {
    let library = Library::new();
    library
        .factory
        .create_entity_manager()
        .persist(full_author())
        .unwrap();

    let factory = library.fresh_factory();
    let em = factory.create_entity_manager();
    let found = em.find("Author", "a1").unwrap().unwrap();

    assert_eq!(found.get("name"), Some(&Value::from("Ursula")));
    assert_eq!(
        labels(&found, "profile", "bio"),
        vec![Value::from("Writes about islands")]
    );
    assert_eq!(
        labels(&found, "books", "title"),
        vec![Value::from("A Wizard of Earthsea"), Value::from("The Dispossessed")]
    );
    assert_eq!(
        labels(&found, "tags", "label"),
        vec![Value::from("fantasy"), Value::from("scifi")]
    );
    assert!(factory.cache().contains(&strata_core::NodeId::assigned("Author", "a1")));
}

#[test]
fn test_merge_updates_both_units() {
    let library = Library::new();
    let em = library.factory.create_entity_manager();
    em.persist(full_author()).unwrap();

    em.merge(
        author("a1", "Ursula K. Le Guin")
            .with_many("books", vec![book("b1", "Earthsea")])
            .with_many("tags", vec![tag("fantasy"), tag("poetry")]),
    )
    .unwrap();

    let authors = library.factory.registry().entity("Author").unwrap();
    let books = library.factory.registry().entity("Book").unwrap();
    assert_eq!(
        library
            .main
            .find(&authors, &"a1".into())
            .unwrap()
            .unwrap()
            .get("name"),
        Some(&Value::from("Ursula K. Le Guin"))
    );
    assert_eq!(
        library
            .docs
            .find(&books, &"b1".into())
            .unwrap()
            .unwrap()
            .get("title"),
        Some(&Value::from("Earthsea"))
    );
    // Merge adds join rows; it never deletes them
    assert_eq!(library.main.row_count("author_tags").unwrap(), 3);
    assert_eq!(library.main.row_count("tags").unwrap(), 3);
}

#[test]
fn test_remove_spans_units() {
    let library = Library::new();
    let em = library.factory.create_entity_manager();
    let saved = em.persist(full_author()).unwrap();

    em.remove(&saved).unwrap();

    assert_eq!(library.main.row_count("authors").unwrap(), 0);
    assert_eq!(library.main.row_count("author_tags").unwrap(), 0);
    // Tags are not cascaded on remove
    assert_eq!(library.main.row_count("tags").unwrap(), 2);
    assert_eq!(library.docs.row_count("profiles"), 0);
    assert_eq!(library.docs.row_count("books"), 0);
    assert!(em.find("Author", "a1").unwrap().is_none());
}

#[test]
fn test_concurrent_managers_share_units() {
    let library = Library::new();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let factory = &library.factory;
            scope.spawn(move || {
                let em = factory.create_entity_manager();
                for n in 0..10 {
                    let id = format!("w{}-a{}", worker, n);
                    em.persist(
                        author(&id, "Someone")
                            .with_many("books", vec![book(&format!("{}-b", id), "Untitled")]),
                    )
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(library.main.row_count("authors").unwrap(), 40);
    assert_eq!(library.docs.row_count("books"), 40);
    assert_eq!(library.factory.cache().len(), 40);
}

// ============================================================================
// Configuration-driven units
// ============================================================================

fn write_project_config(project: &TempDir) {
    let dir = project.path().join(".strata");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.toml"),
        r#"
[session]
default_unit = "main"

[units.main]
kind = "sqlite"
path = "data/main.db"

[units.docs]
kind = "memory"
"#,
    )
    .unwrap();
}

fn configured_factory(project: &TempDir, registry: MetadataRegistry) -> EntityManagerFactory {
    let global = TempDir::new().unwrap();
    let clients = ClientRegistry::load_with(
        &mut ConfigLoader::with_global_dir(global.path()),
        project.path(),
        None,
    )
    .unwrap();
    let config = clients.config().clone();
    EntityManagerFactory::from_config(registry, Arc::new(clients), &config)
}

#[test]
fn test_sqlite_unit_outlives_registry() {
    let project = TempDir::new().unwrap();
    write_project_config(&project);

    {
        let factory = configured_factory(&project, library_registry());
        factory
            .create_entity_manager()
            .persist(author("a1", "Ursula").with_many("books", vec![book("b1", "Earthsea")]))
            .unwrap();
    }

    // New registry: the SQLite file is reopened, the memory unit starts empty
    let factory = configured_factory(&project, library_registry());
    let found = factory
        .create_entity_manager()
        .find("Author", "a1")
        .unwrap()
        .unwrap();

    assert_eq!(found.get("name"), Some(&Value::from("Ursula")));
    assert_eq!(found.related("books").map(Related::len), Some(0));
}

#[test]
fn test_unassigned_entities_use_session_default_unit() {
    let project = TempDir::new().unwrap();
    write_project_config(&project);

    let registry = MetadataRegistry::new()
        .with(
            EntityDescriptor::builder("Tag")
                .table("tags")
                .id("tag_id")
                .column("label")
                .build(),
        )
        .unwrap();
    let factory = configured_factory(&project, registry);
    factory.create_entity_manager().persist(tag("rust")).unwrap();

    let main = SqliteClient::open("main", project.path().join("data").join("main.db")).unwrap();
    assert_eq!(main.row_count("tags").unwrap(), 1);
}
