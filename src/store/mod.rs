//! The object store: SQLite persistence for file objects, definitions,
//! ignored files, saved queries, and diagnostic records.
//!
//! Rows are read as plain tuples and converted into domain types in one
//! place, so the schema stays visible in the queries themselves.

pub mod definitions;
pub mod diagnostics;
pub mod ignored;
pub mod objects;
pub mod queries;

pub use definitions::{Definition, DefinitionDraft};
pub use diagnostics::{ErrorEvent, MetricEvent};
pub use ignored::IgnoreReason;
pub use objects::{FileObject, NewFileObject};
pub use queries::{QueryPage, QuerySort, SavedQuery, SortDirection};

use crate::error::{DbError, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id                   TEXT PRIMARY KEY,
    created_at           TEXT NOT NULL,
    object_type          TEXT NOT NULL,
    path                 TEXT NOT NULL,
    name                 TEXT NOT NULL,
    file_id              TEXT NOT NULL UNIQUE,
    file_created_at      TEXT NOT NULL,
    metadata             TEXT,
    processed            INTEGER NOT NULL DEFAULT 0,
    generated_embeddings INTEGER NOT NULL DEFAULT 0,
    last_processed_at    TEXT,
    error                INTEGER NOT NULL DEFAULT 0,
    error_detail         TEXT
);
CREATE INDEX IF NOT EXISTS idx_objects_file_id ON objects(file_id);
CREATE INDEX IF NOT EXISTS idx_objects_flags
    ON objects(processed, error, generated_embeddings);

CREATE TABLE IF NOT EXISTS definitions (
    id              TEXT PRIMARY KEY,
    created_at      TEXT NOT NULL,
    object_id       TEXT NOT NULL REFERENCES objects(id),
    definition_type TEXT NOT NULL,
    content         TEXT NOT NULL,
    processing_secs REAL NOT NULL,
    model           TEXT
);
CREATE INDEX IF NOT EXISTS idx_definitions_object ON definitions(object_id);

CREATE TABLE IF NOT EXISTS ignored_files (
    file_id    TEXT PRIMARY KEY,
    reason     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queries (
    id               TEXT PRIMARY KEY,
    created_at       TEXT NOT NULL,
    query_text       TEXT NOT NULL,
    n_results        INTEGER NOT NULL,
    max_distance     REAL NOT NULL,
    returned_results INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS query_results (
    query_id  TEXT NOT NULL REFERENCES queries(id),
    object_id TEXT NOT NULL REFERENCES objects(id),
    distance  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_query_results_query ON query_results(query_id);

CREATE TABLE IF NOT EXISTS error_log (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    event      TEXT NOT NULL,
    title      TEXT NOT NULL,
    message    TEXT,
    detail     TEXT,
    metadata   TEXT
);

CREATE TABLE IF NOT EXISTS time_metrics (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    event      TEXT NOT NULL,
    secs       REAL NOT NULL,
    title      TEXT,
    message    TEXT
);
"#;

/// Handle to the SQLite object store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::Sqlite)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::Sqlite)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlite)?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse an RFC 3339 timestamp stored as TEXT.
pub(crate) fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| DbError::Decode(format!("bad timestamp '{raw}': {e}")).into())
}

/// Parse a uuid stored as TEXT.
pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).map_err(|e| DbError::Decode(format!("bad uuid '{raw}': {e}")).into())
}
