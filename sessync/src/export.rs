//! Snapshot export.
//!
//! Reads both key-value areas and every structured database of an origin into
//! a fresh [`Snapshot`]. Export never fails as a whole: enumeration, open and
//! read failures are logged and cost at most the database they occur in.

use sessync_storage::{KeyValueArea, StorageProvider, TransactionMode};
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;
use crate::handle::{bounded, DatabaseGuard};
use crate::options::SyncOptions;
use crate::snapshot::{KeyValueMap, Snapshot, StoreMap, StructuredStores};

/// What happened while producing a snapshot.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Databases present in the snapshot, in enumeration order
    pub exported: Vec<String>,
    /// Databases skipped because they have no object stores
    pub empty: Vec<String>,
    pub failures: Vec<SyncError>,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SnapshotExporter<'a> {
    provider: &'a dyn StorageProvider,
    options: &'a SyncOptions,
}

impl<'a> SnapshotExporter<'a> {
    pub fn new(provider: &'a dyn StorageProvider, options: &'a SyncOptions) -> Self {
        Self { provider, options }
    }

    /// Capture the current state of the origin.
    pub async fn export(&self) -> Snapshot {
        self.export_with_report().await.0
    }

    #[instrument(skip(self), fields(backend = self.provider.backend_name()))]
    pub async fn export_with_report(&self) -> (Snapshot, ExportReport) {
        let mut snapshot = Snapshot::new();
        let mut report = ExportReport::default();

        for area in KeyValueArea::ALL {
            match self.export_area(area).await {
                Ok(entries) => *snapshot.key_values_mut(area) = entries,
                Err(e) => {
                    warn!(area = %area, error = %e, "Failed to export key-value area");
                    report.failures.push(e);
                }
            }
        }

        snapshot.structured = self.export_structured(&mut report).await;

        info!(
            stats = %snapshot.stats(),
            failures = report.failures.len(),
            "Exported snapshot"
        );
        (snapshot, report)
    }

    async fn export_area(&self, area: KeyValueArea) -> Result<KeyValueMap, SyncError> {
        let limit = self.options.operation_timeout;
        let items = bounded(limit, "list key-value entries", self.provider.items(area))
            .await
            .map_err(|source| SyncError::KeyValue {
                area,
                key: "*".to_string(),
                source,
            })?;
        Ok(items.into_iter().collect())
    }

    async fn export_structured(&self, report: &mut ExportReport) -> StructuredStores {
        let mut structured = StructuredStores::new();
        let limit = self.options.operation_timeout;

        let databases = match bounded(limit, "enumerate databases", self.provider.databases()).await
        {
            Ok(databases) => databases,
            Err(source) => {
                let err = SyncError::Enumeration(source);
                error!(error = %err, "Structured export failed");
                report.failures.push(err);
                return structured;
            }
        };

        if databases.is_empty() {
            debug!("No structured databases to export");
            return structured;
        }

        for info in databases {
            if info.name.is_empty() {
                debug!("Skipping unnamed database");
                continue;
            }

            match self.export_database(&info.name).await {
                Ok(Some(stores)) => {
                    structured.insert(info.name.clone(), stores);
                    report.exported.push(info.name);
                }
                Ok(None) => {
                    debug!(db = %info.name, "Database has no object stores");
                    report.empty.push(info.name);
                }
                Err(err) => {
                    error!(db = %info.name, error = %err, "Failed to export database");
                    report.failures.push(err);
                }
            }
        }

        structured
    }

    /// Read every store of one database. `Ok(None)` when it has no stores.
    async fn export_database(&self, name: &str) -> Result<Option<StoreMap>, SyncError> {
        let limit = self.options.operation_timeout;

        let db = bounded(limit, "open database", self.provider.open(name, None, None))
            .await
            .map_err(|source| SyncError::Open {
                database: name.to_string(),
                source,
            })?;
        let db = DatabaseGuard::new(db);

        let store_names = db.store_names();
        if store_names.is_empty() {
            return Ok(None);
        }

        let mut tx = bounded(
            limit,
            "begin read transaction",
            db.transaction(&store_names, TransactionMode::ReadOnly),
        )
        .await
        .map_err(|source| SyncError::Transaction {
            database: name.to_string(),
            source,
        })?;

        let mut stores = StoreMap::new();
        for store in store_names {
            let records = bounded(limit, "read store", tx.get_all(&store))
                .await
                .map_err(|source| SyncError::Read {
                    database: name.to_string(),
                    store: store.clone(),
                    source,
                })?;
            debug!(db = name, store = %store, records = records.len(), "Read store");
            stores.insert(store, records);
        }

        Ok(Some(stores))
    }
}
