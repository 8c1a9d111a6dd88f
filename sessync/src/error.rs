//! Failure taxonomy of snapshot export and import.
//!
//! None of these ever abort a whole snapshot operation: each is caught at the
//! store, database or key-value entry it belongs to, logged, and recorded in
//! the operation's report.

use sessync_storage::{KeyValueArea, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database enumeration failed: {0}")]
    Enumeration(#[source] StorageError),

    #[error("Cannot open database '{database}': {source}")]
    Open {
        database: String,
        source: StorageError,
    },

    #[error("Cannot read store '{store}' of database '{database}': {source}")]
    Read {
        database: String,
        store: String,
        source: StorageError,
    },

    #[error("Schema upgrade of database '{database}' failed: {source}")]
    SchemaUpgrade {
        database: String,
        source: StorageError,
    },

    #[error("Transaction on database '{database}' failed: {source}")]
    Transaction {
        database: String,
        source: StorageError,
    },

    /// `key` is `*` when the whole area could not be listed
    #[error("Key-value {area} storage failed at '{key}': {source}")]
    KeyValue {
        area: KeyValueArea,
        key: String,
        source: StorageError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session bridge closed")]
    BridgeClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Short label for log fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::Enumeration(_) => "enumeration",
            SyncError::Open { .. } => "open",
            SyncError::Read { .. } => "read",
            SyncError::SchemaUpgrade { .. } => "schema_upgrade",
            SyncError::Transaction { .. } => "transaction",
            SyncError::KeyValue { .. } => "key_value",
            SyncError::Config(_) => "config",
            SyncError::BridgeClosed => "bridge_closed",
            SyncError::Io(_) => "io",
            SyncError::Json(_) => "json",
        }
    }

    /// Database the failure is scoped to, if any.
    pub fn database(&self) -> Option<&str> {
        match self {
            SyncError::Open { database, .. }
            | SyncError::Read { database, .. }
            | SyncError::SchemaUpgrade { database, .. }
            | SyncError::Transaction { database, .. } => Some(database),
            _ => None,
        }
    }

    /// Whether the underlying storage call hit the configured time bound.
    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::Enumeration(source)
            | SyncError::Open { source, .. }
            | SyncError::Read { source, .. }
            | SyncError::SchemaUpgrade { source, .. }
            | SyncError::Transaction { source, .. }
            | SyncError::KeyValue { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
