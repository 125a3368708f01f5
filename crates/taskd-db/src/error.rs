//! Storage-layer error types.

use thiserror::Error;

/// Errors surfaced by a [`crate::adapter::StorageAdapter`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The connection string scheme did not match `sqlite:`, `mysql:`,
    /// `postgres:`, or `postgresql:`.
    #[error("unrecognized database engine in URL: {0}")]
    UnknownEngine(String),

    /// A task referenced by id does not exist.
    #[error("task {0} not found")]
    NotFound(i64),

    /// The stored `payload`/`result`/`error` blob could not be decoded as
    /// the expected value.
    #[error("failed to decode {field} for task {id}: {source}")]
    Decode {
        field: &'static str,
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    /// The underlying driver returned an error.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
