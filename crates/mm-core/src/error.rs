//! Typed error taxonomy for the ingestion and query paths.
//!
//! Internal plumbing uses `anyhow::Result` with `.context()`; these enums
//! sit at the API/task boundary where callers need to match on a specific
//! failure class rather than a formatted message.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported file: {path}")]
    Unsupported { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding failed for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("empty query")]
    EmptyQuery,

    #[error("unknown modality filter: {0}")]
    UnknownModality(String),

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed at version {version}: {reason}")]
    Migration { version: i64, reason: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
