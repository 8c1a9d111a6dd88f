//! Core storage trait definitions.
//!
//! `StorageProvider` is the capability interface over everything an origin can
//! persist: two flat key-value areas and any number of structured databases,
//! each holding named object stores of auto-keyed records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// An opaque structured record held by an object store.
pub type Record = serde_json::Value;

/// The two flat key-value areas of an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValueArea {
    /// Persists across sessions
    Local,
    /// Discarded when the session ends
    Session,
}

impl KeyValueArea {
    pub const ALL: [KeyValueArea; 2] = [KeyValueArea::Local, KeyValueArea::Session];
}

impl fmt::Display for KeyValueArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValueArea::Local => write!(f, "local"),
            KeyValueArea::Session => write!(f, "session"),
        }
    }
}

/// A database as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "readonly"),
            TransactionMode::ReadWrite => write!(f, "readwrite"),
        }
    }
}

/// Version transition passed to an upgrade handler.
///
/// `old_version` is 0 when the database is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u64,
    pub new_version: u64,
}

/// Schema view available while a version change is in progress.
pub trait SchemaUpgrade {
    /// Names of the object stores that currently exist, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Create an object store with implicit auto-increment keys.
    ///
    /// # Errors
    ///
    /// Fails if a store with that name already exists.
    fn create_store(&mut self, name: &str) -> Result<()>;

    /// Check whether a store exists.
    fn contains_store(&self, name: &str) -> bool {
        self.store_names().iter().any(|s| s == name)
    }
}

/// Callback invoked when `open` moves a database to a higher version.
///
/// If the handler returns an error the open fails and the schema is left
/// exactly as it was.
pub trait UpgradeHandler: Send + Sync {
    fn on_upgrade(&self, change: VersionChange, schema: &mut dyn SchemaUpgrade) -> Result<()>;
}

impl<F> UpgradeHandler for F
where
    F: Fn(VersionChange, &mut dyn SchemaUpgrade) -> Result<()> + Send + Sync,
{
    fn on_upgrade(&self, change: VersionChange, schema: &mut dyn SchemaUpgrade) -> Result<()> {
        self(change, schema)
    }
}

/// Storage capability for a single origin.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. They do not coordinate concurrent
/// snapshot operations against the same database; callers serialize those.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// All keys of a key-value area, in the provider's stable order.
    async fn keys(&self, area: KeyValueArea) -> Result<Vec<String>>;

    /// Read one key-value entry.
    async fn get_item(&self, area: KeyValueArea, key: &str) -> Result<Option<String>>;

    /// Write one key-value entry, overwriting any previous value.
    async fn set_item(&self, area: KeyValueArea, key: &str, value: &str) -> Result<()>;

    /// All entries of a key-value area in key order.
    ///
    /// Keys that disappear between listing and reading are skipped.
    async fn items(&self, area: KeyValueArea) -> Result<Vec<(String, String)>> {
        let keys = self.keys(area).await?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_item(area, &key).await? {
                items.push((key, value));
            }
        }
        Ok(items)
    }

    /// Enumerate the structured databases visible to the origin.
    async fn databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Open a structured database, creating it when absent.
    ///
    /// With `version == None` an existing database opens at its current
    /// version and no upgrade runs; an absent one is created at version 1.
    /// With `Some(v)` the call fails with `StorageError::Version` when `v` is
    /// below the current version, and runs `upgrade` when `v` is above it.
    async fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: Option<&dyn UpgradeHandler>,
    ) -> Result<Box<dyn Database>>;

    /// Get a human-readable name for this provider.
    fn backend_name(&self) -> &'static str;
}

/// An open connection to a structured database.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> u64;

    /// Object store names, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Start a transaction scoped to `stores`.
    ///
    /// # Errors
    ///
    /// `NotFound` if any store does not exist, `TransactionInactive` if the
    /// connection has been closed.
    async fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// A transaction over a fixed set of object stores.
///
/// Writes are staged and become visible to other transactions only after a
/// successful `commit`. Dropping an uncommitted transaction discards them.
#[async_trait]
pub trait Transaction: Send {
    fn mode(&self) -> TransactionMode;

    /// All records of a store, in key order.
    async fn get_all(&mut self, store: &str) -> Result<Vec<Record>>;

    /// Remove every record of a store.
    async fn clear(&mut self, store: &str) -> Result<()>;

    /// Insert a record under the next auto-increment key.
    async fn put(&mut self, store: &str, record: Record) -> Result<()>;

    /// Make staged writes durable. The transaction is inactive afterwards.
    async fn commit(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryProvider;
    use serde_json::json;

    #[test]
    fn test_area_display() {
        assert_eq!(KeyValueArea::Local.to_string(), "local");
        assert_eq!(KeyValueArea::Session.to_string(), "session");
        assert_eq!(TransactionMode::ReadWrite.to_string(), "readwrite");
    }

    #[tokio::test]
    async fn test_default_items_in_key_order() {
        let provider = MemoryProvider::new();
        provider
            .set_item(KeyValueArea::Local, "zeta", "1")
            .await
            .unwrap();
        provider
            .set_item(KeyValueArea::Local, "alpha", "2")
            .await
            .unwrap();

        let items = provider.items(KeyValueArea::Local).await.unwrap();
        assert_eq!(
            items,
            vec![
                ("alpha".to_string(), "2".to_string()),
                ("zeta".to_string(), "1".to_string()),
            ]
        );
        assert!(provider.items(KeyValueArea::Session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closure_upgrade_handler() {
        let provider = MemoryProvider::new();
        let handler = |change: VersionChange, schema: &mut dyn SchemaUpgrade| -> Result<()> {
            assert_eq!(change.old_version, 0);
            if !schema.contains_store("items") {
                schema.create_store("items")?;
            }
            Ok(())
        };

        let db = provider.open("notes", Some(2), Some(&handler)).await.unwrap();
        assert_eq!(db.version(), 2);
        assert_eq!(db.store_names(), vec!["items".to_string()]);

        let mut tx = db
            .transaction(&["items".to_string()], TransactionMode::ReadWrite)
            .await
            .unwrap();
        tx.put("items", json!({"id": 1})).await.unwrap();
        tx.commit().await.unwrap();
        db.close();
    }
}
