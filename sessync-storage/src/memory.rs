//! In-memory storage provider.
//!
//! Holds the whole origin in process memory. Used as the reference provider in
//! tests and by embedders that mirror a guest's storage without touching disk.
//! Individual operations can be made to fail with the `fail_*` methods.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::store::{ObjectStore, SchemaDraft};
use crate::traits::{
    Database, DatabaseInfo, KeyValueArea, Record, StorageProvider, Transaction, TransactionMode,
    UpgradeHandler, VersionChange,
};

/// Operations that should fail, keyed by database (and store) name.
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    fail_enumeration: bool,
    fail_open: HashSet<String>,
    fail_upgrade: HashSet<String>,
    fail_read: HashSet<(String, String)>,
    fail_commit: HashSet<String>,
    fail_set_item: HashSet<String>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    version: u64,
    stores: BTreeMap<String, ObjectStore>,
}

type SharedDatabase = Arc<Mutex<DatabaseState>>;

#[derive(Debug, Default)]
struct Inner {
    local: Mutex<BTreeMap<String, String>>,
    session: Mutex<BTreeMap<String, String>>,
    databases: Mutex<BTreeMap<String, SharedDatabase>>,
    faults: Mutex<FaultPlan>,
}

impl Inner {
    fn area(&self, area: KeyValueArea) -> &Mutex<BTreeMap<String, String>> {
        match area {
            KeyValueArea::Local => &self.local,
            KeyValueArea::Session => &self.session,
        }
    }
}

/// In-memory storage for one origin.
///
/// Cloning yields another handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records to a store, creating the database and store if needed.
    pub fn insert_records(
        &self,
        database: &str,
        store: &str,
        records: impl IntoIterator<Item = Record>,
    ) {
        let state = self
            .inner
            .databases
            .lock()
            .entry(database.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DatabaseState {
                    version: 1,
                    stores: BTreeMap::new(),
                }))
            })
            .clone();

        let mut state = state.lock();
        let target = state.stores.entry(store.to_string()).or_default();
        for record in records {
            target.put(record);
        }
    }

    /// Records of a store, or `None` if the database or store is absent.
    pub fn records(&self, database: &str, store: &str) -> Option<Vec<Record>> {
        let state = self.inner.databases.lock().get(database)?.clone();
        let state = state.lock();
        state.stores.get(store).map(ObjectStore::records)
    }

    /// Current version of a database, if it exists.
    pub fn version(&self, database: &str) -> Option<u64> {
        let state = self.inner.databases.lock().get(database)?.clone();
        let version = state.lock().version;
        Some(version)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.inner.databases.lock().keys().cloned().collect()
    }

    /// Drop every key-value entry and every database.
    pub fn clear_all(&self) {
        self.inner.local.lock().clear();
        self.inner.session.lock().clear();
        self.inner.databases.lock().clear();
    }

    /// Discard the session area, as happens when a browsing session ends.
    pub fn end_session(&self) {
        self.inner.session.lock().clear();
    }

    pub fn fail_enumeration(&self) {
        self.inner.faults.lock().fail_enumeration = true;
    }

    pub fn fail_open(&self, database: &str) {
        self.inner.faults.lock().fail_open.insert(database.to_string());
    }

    pub fn fail_upgrade(&self, database: &str) {
        self.inner
            .faults
            .lock()
            .fail_upgrade
            .insert(database.to_string());
    }

    pub fn fail_read(&self, database: &str, store: &str) {
        self.inner
            .faults
            .lock()
            .fail_read
            .insert((database.to_string(), store.to_string()));
    }

    pub fn fail_commit(&self, database: &str) {
        self.inner
            .faults
            .lock()
            .fail_commit
            .insert(database.to_string());
    }

    pub fn fail_set_item(&self, key: &str) {
        self.inner.faults.lock().fail_set_item.insert(key.to_string());
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn keys(&self, area: KeyValueArea) -> Result<Vec<String>> {
        Ok(self.inner.area(area).lock().keys().cloned().collect())
    }

    async fn get_item(&self, area: KeyValueArea, key: &str) -> Result<Option<String>> {
        Ok(self.inner.area(area).lock().get(key).cloned())
    }

    async fn set_item(&self, area: KeyValueArea, key: &str, value: &str) -> Result<()> {
        if self.inner.faults.lock().fail_set_item.contains(key) {
            return Err(StorageError::Backend(format!(
                "quota exceeded writing {} key '{}'",
                area, key
            )));
        }
        self.inner
            .area(area)
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        if self.inner.faults.lock().fail_enumeration {
            return Err(StorageError::Backend(
                "database enumeration unavailable".to_string(),
            ));
        }
        let databases = self.inner.databases.lock();
        Ok(databases
            .iter()
            .map(|(name, state)| DatabaseInfo {
                name: name.clone(),
                version: state.lock().version,
            })
            .collect())
    }

    #[instrument(skip(self, upgrade), fields(backend = "memory"))]
    async fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: Option<&dyn UpgradeHandler>,
    ) -> Result<Box<dyn Database>> {
        let (fail_open, fail_upgrade) = {
            let faults = self.inner.faults.lock();
            (
                faults.fail_open.contains(name),
                faults.fail_upgrade.contains(name),
            )
        };
        if fail_open {
            return Err(StorageError::Backend(format!(
                "cannot open database '{}'",
                name
            )));
        }

        let mut databases = self.inner.databases.lock();
        let state = databases
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(DatabaseState::default())));

        let opened_version = {
            let mut guard = state.lock();
            let current = guard.version;
            let requested = match version {
                Some(0) => {
                    return Err(StorageError::Backend(
                        "database version must be positive".to_string(),
                    ))
                }
                Some(v) => v,
                None => current.max(1),
            };
            if requested < current {
                return Err(StorageError::Version {
                    name: name.to_string(),
                    current,
                    requested,
                });
            }

            if requested > current {
                if fail_upgrade {
                    return Err(StorageError::Upgrade(format!(
                        "version change of '{}' aborted",
                        name
                    )));
                }
                let change = VersionChange {
                    old_version: current,
                    new_version: requested,
                };
                let mut draft = SchemaDraft::new(guard.stores.keys().cloned());
                if let Some(handler) = upgrade {
                    handler
                        .on_upgrade(change, &mut draft)
                        .map_err(|e| StorageError::Upgrade(format!("{}: {}", name, e)))?;
                }
                for store in draft.created() {
                    guard.stores.entry(store.clone()).or_default();
                }
                guard.version = requested;
                debug!(
                    "Upgraded '{}' from version {} to {}",
                    name, current, requested
                );
            }
            guard.version
        };

        databases
            .entry(name.to_string())
            .or_insert_with(|| state.clone());

        Ok(Box::new(MemoryDatabase {
            name: name.to_string(),
            version: opened_version,
            state,
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryDatabase {
    name: String,
    version: u64,
    state: SharedDatabase,
    inner: Arc<Inner>,
    closed: AtomicBool,
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.state.lock().stores.keys().cloned().collect()
    }

    async fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::TransactionInactive(format!(
                "database '{}' is closed",
                self.name
            )));
        }

        let state = self.state.lock();
        let mut staged = BTreeMap::new();
        for store in stores {
            let contents = state
                .stores
                .get(store)
                .ok_or_else(|| StorageError::NotFound(format!("{}/{}", self.name, store)))?;
            staged.insert(store.clone(), contents.clone());
        }

        Ok(Box::new(MemoryTransaction {
            database: self.name.clone(),
            mode,
            state: self.state.clone(),
            inner: self.inner.clone(),
            staged,
            active: true,
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryTransaction {
    database: String,
    mode: TransactionMode,
    state: SharedDatabase,
    inner: Arc<Inner>,
    staged: BTreeMap<String, ObjectStore>,
    active: bool,
}

impl MemoryTransaction {
    fn store_mut(&mut self, store: &str) -> Result<&mut ObjectStore> {
        if !self.active {
            return Err(StorageError::TransactionInactive(self.database.clone()));
        }
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(format!("{}/{}", self.database, store)));
        }
        let database = &self.database;
        self.staged
            .get_mut(store)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", database, store)))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get_all(&mut self, store: &str) -> Result<Vec<Record>> {
        if !self.active {
            return Err(StorageError::TransactionInactive(self.database.clone()));
        }
        let failing = self
            .inner
            .faults
            .lock()
            .fail_read
            .contains(&(self.database.clone(), store.to_string()));
        if failing {
            return Err(StorageError::Backend(format!(
                "read of {}/{} failed",
                self.database, store
            )));
        }
        self.staged
            .get(store)
            .map(ObjectStore::records)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", self.database, store)))
    }

    async fn clear(&mut self, store: &str) -> Result<()> {
        self.store_mut(store)?.clear();
        Ok(())
    }

    async fn put(&mut self, store: &str, record: Record) -> Result<()> {
        self.store_mut(store)?.put(record);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(StorageError::TransactionInactive(self.database.clone()));
        }
        self.active = false;

        if self.inner.faults.lock().fail_commit.contains(&self.database) {
            return Err(StorageError::Backend(format!(
                "transaction on '{}' aborted",
                self.database
            )));
        }

        if self.mode == TransactionMode::ReadWrite {
            let mut state = self.state.lock();
            for (name, contents) in std::mem::take(&mut self.staged) {
                state.stores.insert(name, contents);
            }
        }
        Ok(())
    }
}
