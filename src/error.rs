//! Crate-wide error types.
//!
//! Domain errors are grouped into sub-enums and wrapped into a single
//! top-level [`Error`] so call sites can propagate with `?` regardless of
//! which subsystem they touch.

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for all filesift operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A lookup of a saved query's results by an id that does not exist.
    #[error("saved query '{0}' does not exist")]
    QueryNotFound(uuid::Uuid),

    /// Similarity search was invoked with blank query text.
    #[error("query text must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Db(DbError::Sqlite(error))
    }
}

/// Object store (SQLite) errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A stored row failed to convert back into its domain type
    /// (bad uuid, malformed timestamp, invalid JSON metadata).
    #[error("failed to decode stored row: {0}")]
    Decode(String),
}

/// Vector index and embedding errors.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("lancedb: {0}")]
    LanceDb(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Media metadata probing errors. Oversized inputs are reported separately
/// from ordinary decode failures so the scanner can tag them distinctly.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to decode '{path}': {detail}")]
    Decode { path: String, detail: String },

    #[error("'{path}' exceeds the decode limit: {detail}")]
    TooLarge { path: String, detail: String },
}

/// Processor loading and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("processor '{processor}' failed: {detail}")]
    Failed { processor: String, detail: String },

    #[error("object type mismatch: processor targets '{expected}', object is '{got}'")]
    TypeMismatch { expected: String, got: String },
}
