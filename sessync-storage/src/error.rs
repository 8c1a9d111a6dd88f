//! Storage error types.

use std::io;
use thiserror::Error;

/// Storage operation errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error during storage operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored data could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database or object store not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested version is lower than the stored version
    #[error("Version error: database '{name}' is at version {current}, requested {requested}")]
    Version {
        name: String,
        current: u64,
        requested: u64,
    },

    /// Write attempted inside a read-only transaction
    #[error("Transaction is read-only: {0}")]
    ReadOnly(String),

    /// Operation on a committed transaction or a closed database
    #[error("Transaction inactive: {0}")]
    TransactionInactive(String),

    /// Schema upgrade callback failed
    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    /// Operation did not finish within its time bound
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
            || matches!(self, StorageError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }

    /// Check if this is a version conflict.
    pub fn is_version_error(&self) -> bool {
        matches!(self, StorageError::Version { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = StorageError::NotFound("notes".to_string());
        assert!(err.is_not_found());

        let io_err = StorageError::Io(io::Error::new(io::ErrorKind::NotFound, "not found"));
        assert!(io_err.is_not_found());
        assert!(!StorageError::Backend("x".into()).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::Version {
            name: "notes".to_string(),
            current: 7,
            requested: 3,
        };
        assert!(err.is_version_error());
        assert_eq!(
            err.to_string(),
            "Version error: database 'notes' is at version 7, requested 3"
        );
    }
}
