//! Snapshot import.
//!
//! Applies a [`Snapshot`] to an origin, best effort:
//!
//! - Key-value entries are **merged**: each entry overwrites the key it names,
//!   unrelated keys survive.
//! - Structured stores are **replaced**: every store named by the snapshot is
//!   cleared and refilled in snapshot order inside one read-write transaction
//!   per database. Stores the snapshot does not mention are left alone.
//!
//! Each database moves through
//! `Requested → Opening → (SchemaUpgrade) → Open → TransactionActive →
//! Committed | Aborted`, or ends in `Failed` when it cannot be opened. A
//! failure never stops the remaining databases from being attempted.

use parking_lot::Mutex;
use sessync_storage::{
    KeyValueArea, Result as StorageResult, SchemaUpgrade, StorageError, StorageProvider,
    TransactionMode, UpgradeHandler, VersionChange,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::SyncError;
use crate::handle::{bounded, DatabaseGuard};
use crate::options::SyncOptions;
use crate::snapshot::{Snapshot, StoreMap};

/// Lifecycle of a single database import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Requested,
    Opening,
    SchemaUpgrade,
    Open,
    TransactionActive,
    Committed,
    Aborted,
    Failed,
    Skipped,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportState::Requested => "requested",
            ImportState::Opening => "opening",
            ImportState::SchemaUpgrade => "schema_upgrade",
            ImportState::Open => "open",
            ImportState::TransactionActive => "transaction_active",
            ImportState::Committed => "committed",
            ImportState::Aborted => "aborted",
            ImportState::Failed => "failed",
            ImportState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a database was not imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The snapshot lists no stores for it
    NoStores,
    /// Excluded by the denylist; carries the matching rule
    Denied(String),
}

/// Terminal result of one database import.
#[derive(Debug)]
pub enum DatabaseOutcome {
    Committed {
        stores: usize,
        records: usize,
        created_stores: Vec<String>,
    },
    Skipped(SkipReason),
    /// Opening or upgrading failed; nothing was written
    Failed(SyncError),
    /// The transaction failed; none of its writes were kept
    Aborted(SyncError),
}

impl DatabaseOutcome {
    pub fn state(&self) -> ImportState {
        match self {
            DatabaseOutcome::Committed { .. } => ImportState::Committed,
            DatabaseOutcome::Skipped(_) => ImportState::Skipped,
            DatabaseOutcome::Failed(_) => ImportState::Failed,
            DatabaseOutcome::Aborted(_) => ImportState::Aborted,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            DatabaseOutcome::Failed(e) | DatabaseOutcome::Aborted(e) => Some(e),
            _ => None,
        }
    }
}

/// What happened while applying a snapshot.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub keys_written: usize,
    pub key_failures: Vec<SyncError>,
    /// Per-database outcomes in processing order
    pub databases: Vec<(String, DatabaseOutcome)>,
}

impl ImportReport {
    pub fn outcome(&self, database: &str) -> Option<&DatabaseOutcome> {
        self.databases
            .iter()
            .find(|(name, _)| name == database)
            .map(|(_, outcome)| outcome)
    }

    pub fn committed(&self) -> impl Iterator<Item = &str> {
        self.databases
            .iter()
            .filter(|(_, o)| o.state() == ImportState::Committed)
            .map(|(name, _)| name.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncError> {
        self.key_failures
            .iter()
            .chain(self.databases.iter().filter_map(|(_, o)| o.error()))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Upgrade callback creating the snapshot's missing stores. Never drops any.
struct CreateMissingStores<'a> {
    database: &'a str,
    stores: Vec<String>,
    created: Mutex<Vec<String>>,
}

impl UpgradeHandler for CreateMissingStores<'_> {
    fn on_upgrade(&self, change: VersionChange, schema: &mut dyn SchemaUpgrade) -> StorageResult<()> {
        trace!(
            db = self.database,
            state = %ImportState::SchemaUpgrade,
            from = change.old_version,
            to = change.new_version,
            "Upgrading schema"
        );
        for store in &self.stores {
            if !schema.contains_store(store) {
                schema.create_store(store)?;
                self.created.lock().push(store.clone());
            }
        }
        Ok(())
    }
}

pub struct SnapshotImporter<'a> {
    provider: &'a dyn StorageProvider,
    options: &'a SyncOptions,
}

impl<'a> SnapshotImporter<'a> {
    pub fn new(provider: &'a dyn StorageProvider, options: &'a SyncOptions) -> Self {
        Self { provider, options }
    }

    /// Apply `snapshot`. Failures are logged and collected in the report.
    #[instrument(skip_all, fields(backend = self.provider.backend_name()))]
    pub async fn import(&self, snapshot: &Snapshot) -> ImportReport {
        let mut report = ImportReport::default();

        if self.options.import_key_values {
            self.import_key_values(snapshot, &mut report).await;
        }

        if self.options.import_structured && !snapshot.structured.is_empty() {
            let versions = self.current_versions().await;
            for (name, stores) in &snapshot.structured {
                let outcome = self.import_database(name, stores, versions.as_ref()).await;
                match &outcome {
                    DatabaseOutcome::Committed { records, .. } => {
                        debug!(db = %name, records, "Imported database")
                    }
                    DatabaseOutcome::Skipped(SkipReason::Denied(rule)) => {
                        info!(db = %name, rule = %rule, "Database excluded from import")
                    }
                    DatabaseOutcome::Skipped(SkipReason::NoStores) => {
                        debug!(db = %name, "Snapshot lists no stores, skipping")
                    }
                    DatabaseOutcome::Failed(e) | DatabaseOutcome::Aborted(e) => error!(
                        db = %name,
                        state = %outcome.state(),
                        error = %e,
                        "Failed to import database"
                    ),
                }
                report.databases.push((name.clone(), outcome));
            }
        }

        info!(
            keys = report.keys_written,
            databases = report.committed().count(),
            failures = report.failures().count(),
            "Imported snapshot"
        );
        report
    }

    async fn import_key_values(&self, snapshot: &Snapshot, report: &mut ImportReport) {
        let limit = self.options.operation_timeout;
        for area in KeyValueArea::ALL {
            for (key, value) in snapshot.key_values(area) {
                match bounded(limit, "set item", self.provider.set_item(area, key, value)).await {
                    Ok(()) => report.keys_written += 1,
                    Err(source) => {
                        let err = SyncError::KeyValue {
                            area,
                            key: key.clone(),
                            source,
                        };
                        warn!(error = %err, "Failed to import key-value entry");
                        report.key_failures.push(err);
                    }
                }
            }
        }
    }

    /// Versions of the databases that exist now, or `None` if they cannot be
    /// listed.
    async fn current_versions(&self) -> Option<HashMap<String, u64>> {
        let limit = self.options.operation_timeout;
        match bounded(limit, "enumerate databases", self.provider.databases()).await {
            Ok(databases) => Some(
                databases
                    .into_iter()
                    .map(|info| (info.name, info.version))
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "Cannot list databases, falling back to clock versions");
                None
            }
        }
    }

    async fn import_database(
        &self,
        name: &str,
        stores: &StoreMap,
        versions: Option<&HashMap<String, u64>>,
    ) -> DatabaseOutcome {
        trace!(db = name, state = %ImportState::Requested, "Importing database");

        if stores.is_empty() {
            return DatabaseOutcome::Skipped(SkipReason::NoStores);
        }
        if let Some(rule) = self.options.denylist.matching_rule(name) {
            return DatabaseOutcome::Skipped(SkipReason::Denied(rule));
        }

        let limit = self.options.operation_timeout;
        let version = requested_version(versions.map(|v| v.get(name).copied()));
        let upgrade = CreateMissingStores {
            database: name,
            stores: stores.keys().cloned().collect(),
            created: Mutex::new(Vec::new()),
        };

        trace!(db = name, state = %ImportState::Opening, version, "Opening database");
        let opened = bounded(
            limit,
            "open database",
            self.provider.open(name, Some(version), Some(&upgrade)),
        )
        .await;
        let db = match opened {
            Ok(db) => DatabaseGuard::new(db),
            Err(source @ StorageError::Upgrade(_)) => {
                return DatabaseOutcome::Failed(SyncError::SchemaUpgrade {
                    database: name.to_string(),
                    source,
                })
            }
            Err(source) => {
                return DatabaseOutcome::Failed(SyncError::Open {
                    database: name.to_string(),
                    source,
                })
            }
        };
        trace!(db = name, state = %ImportState::Open, version = db.version(), "Opened database");

        match self.write_stores(&db, stores).await {
            Ok(records) => DatabaseOutcome::Committed {
                stores: stores.len(),
                records,
                created_stores: upgrade.created.into_inner(),
            },
            Err(source) => DatabaseOutcome::Aborted(SyncError::Transaction {
                database: name.to_string(),
                source,
            }),
        }
    }

    /// Clear and refill every store in one transaction. Returns records written.
    async fn write_stores(&self, db: &DatabaseGuard, stores: &StoreMap) -> StorageResult<usize> {
        let limit = self.options.operation_timeout;
        let scope: Vec<String> = stores.keys().cloned().collect();

        let mut tx = bounded(
            limit,
            "begin write transaction",
            db.transaction(&scope, TransactionMode::ReadWrite),
        )
        .await?;
        trace!(db = db.name(), state = %ImportState::TransactionActive, "Began write transaction");

        let mut written = 0;
        for (store, records) in stores {
            bounded(limit, "clear store", tx.clear(store)).await?;
            for record in records {
                bounded(limit, "put record", tx.put(store, record.clone())).await?;
                written += 1;
            }
        }

        bounded(limit, "commit transaction", tx.commit()).await?;
        Ok(written)
    }
}

/// Version to request so that the upgrade callback always runs.
///
/// `known` is `None` when the existing versions could not be listed, in
/// which case a millisecond clock reading stands in.
fn requested_version(known: Option<Option<u64>>) -> u64 {
    match known {
        Some(Some(current)) => current.saturating_add(1),
        Some(None) => 1,
        None => chrono::Utc::now().timestamp_millis().max(1) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessync_storage::MemoryProvider;
    use serde_json::json;

    #[test]
    fn test_requested_version() {
        assert_eq!(requested_version(Some(None)), 1);
        assert_eq!(requested_version(Some(Some(7))), 8);
        assert!(requested_version(None) > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_creates_missing_stores_and_keeps_others() {
        let provider = MemoryProvider::new();
        provider.insert_records("notes", "archive", vec![json!("old")]);

        let mut snapshot = Snapshot::new();
        snapshot.set_records("notes", "items", vec![json!({"id": 1})]);

        let options = SyncOptions::default();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;

        match report.outcome("notes").unwrap() {
            DatabaseOutcome::Committed {
                created_stores,
                records,
                ..
            } => {
                assert_eq!(created_stores, &vec!["items".to_string()]);
                assert_eq!(*records, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(provider.version("notes"), Some(2));
        assert_eq!(provider.records("notes", "archive"), Some(vec![json!("old")]));
        assert_eq!(
            provider.records("notes", "items"),
            Some(vec![json!({"id": 1})])
        );
    }

    #[tokio::test]
    async fn test_empty_store_list_is_skipped() {
        let provider = MemoryProvider::new();
        let mut snapshot = Snapshot::new();
        snapshot.structured.insert("ghost".to_string(), StoreMap::new());

        let options = SyncOptions::default();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;

        assert_eq!(report.outcome("ghost").unwrap().state(), ImportState::Skipped);
        assert!(provider.database_names().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_failure_is_reported() {
        let provider = MemoryProvider::new();
        provider.fail_upgrade("notes");
        let mut snapshot = Snapshot::new();
        snapshot.set_records("notes", "items", vec![json!(1)]);
        snapshot.set_records("other", "items", vec![json!(2)]);

        let options = SyncOptions::default();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;

        let outcome = report.outcome("notes").unwrap();
        assert_eq!(outcome.state(), ImportState::Failed);
        assert_eq!(outcome.error().unwrap().error_type(), "schema_upgrade");
        assert_eq!(report.committed().collect::<Vec<_>>(), vec!["other"]);
    }

    #[tokio::test]
    async fn test_commit_failure_aborts_database() {
        let provider = MemoryProvider::new();
        provider.insert_records("notes", "items", vec![json!("keep")]);
        provider.fail_commit("notes");

        let mut snapshot = Snapshot::new();
        snapshot.set_records("notes", "items", vec![json!("new")]);

        let options = SyncOptions::default();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;

        assert_eq!(report.outcome("notes").unwrap().state(), ImportState::Aborted);
        assert_eq!(provider.records("notes", "items"), Some(vec![json!("keep")]));
    }

    #[tokio::test]
    async fn test_key_value_failure_is_isolated() {
        let provider = MemoryProvider::new();
        provider.fail_set_item("huge");

        let mut snapshot = Snapshot::new();
        snapshot.local.insert("huge".to_string(), "x".repeat(64));
        snapshot.local.insert("small".to_string(), "y".to_string());

        let options = SyncOptions::default();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;

        assert_eq!(report.keys_written, 1);
        assert_eq!(report.key_failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            provider.get_item(KeyValueArea::Local, "small").await.unwrap(),
            Some("y".to_string())
        );
    }

    #[tokio::test]
    async fn test_sections_can_be_disabled() {
        let provider = MemoryProvider::new();
        let mut snapshot = Snapshot::new();
        snapshot.local.insert("k".to_string(), "v".to_string());
        snapshot.set_records("notes", "items", vec![json!(1)]);

        let options = SyncOptions {
            import_key_values: false,
            ..SyncOptions::default()
        };
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;
        assert_eq!(report.keys_written, 0);
        assert!(provider.keys(KeyValueArea::Local).await.unwrap().is_empty());
        assert_eq!(provider.records("notes", "items"), Some(vec![json!(1)]));

        let options = SyncOptions {
            import_structured: false,
            ..SyncOptions::default()
        };
        provider.clear_all();
        let report = SnapshotImporter::new(&provider, &options)
            .import(&snapshot)
            .await;
        assert_eq!(report.keys_written, 1);
        assert!(report.databases.is_empty());
        assert!(provider.database_names().is_empty());
    }
}
