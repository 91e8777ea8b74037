//! Error types for openair-store.

use std::path::PathBuf;

/// Result type for openair-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in openair-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write transaction failed and was rolled back.
    #[error("Failed to {operation}: {source}")]
    WriteFailed {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database was written by a newer schema than this build knows.
    #[error("Unsupported schema version {found} (this build supports {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// A stored or computed timestamp could not be converted.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl Error {
    pub(crate) fn write(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Error::WriteFailed { operation, source }
    }

    /// Returns true if this is a failed (and rolled back) write.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Error::WriteFailed { .. })
    }
}
