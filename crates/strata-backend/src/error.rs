//! Backend error types.

use std::path::PathBuf;
use strata_core::ClientError;
use thiserror::Error;

/// Errors that can occur inside a backend client.
#[derive(Error, Debug)]
pub enum BackendError {
    /// SQLite statement or connection failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored row could not be encoded or decoded
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] strata_config::ConfigError),

    /// Database was written by an incompatible schema version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },

    /// Database file could not be opened
    #[error("failed to open database '{path}': {message}")]
    Open { path: PathBuf, message: String },
}

impl BackendError {
    /// Create an Open error.
    pub fn open(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Open {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<BackendError> for ClientError {
    fn from(err: BackendError) -> Self {
        ClientError::storage(err)
    }
}
