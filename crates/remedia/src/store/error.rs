//! Error types for session storage operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error serializing or deserializing a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl StorageError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
