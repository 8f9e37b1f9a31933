//! SQLite schema for the document store.
//!
//! Every entity row lives in one `entities` table as a JSON document keyed by
//! (table name, canonical key). Join-table rows live in `join_rows`.

/// Schema version stored in `strata_metadata`
pub const SCHEMA_VERSION: &str = "1";

pub const SCHEMA_CREATE_ENTITIES: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    -- Logical table of the entity descriptor
    table_name TEXT NOT NULL,

    -- Canonical key string
    id TEXT NOT NULL,

    -- Full row, identifier and foreign-key columns included
    row_json TEXT NOT NULL,

    PRIMARY KEY (table_name, id)
)
"#;

pub const SCHEMA_CREATE_JOIN_ROWS: &str = r#"
CREATE TABLE IF NOT EXISTS join_rows (
    table_name TEXT NOT NULL,

    -- {join_column: owner, inverse_join_column: inverse}
    row_json TEXT NOT NULL,

    UNIQUE (table_name, row_json)
)
"#;

/// Generated-key counters, one per logical table
pub const SCHEMA_CREATE_SEQUENCES: &str = r#"
CREATE TABLE IF NOT EXISTS sequences (
    table_name TEXT PRIMARY KEY NOT NULL,
    next_value INTEGER NOT NULL
)
"#;

pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS strata_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;
