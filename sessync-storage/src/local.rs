//! Directory-backed storage provider.
//!
//! Persists one origin as JSON files (see [`OriginPaths`] for the layout).
//! Every file is replaced atomically by writing a sibling temp file and
//! renaming it into place. A transaction commit stages every touched store
//! before renaming any of them, so a failed commit leaves the database as it
//! was.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError};
use crate::path::{decode_name, OriginPaths};
use crate::store::{ObjectStore, SchemaDraft};
use crate::traits::{
    Database, DatabaseInfo, KeyValueArea, Record, StorageProvider, Transaction, TransactionMode,
    UpgradeHandler, VersionChange,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseMeta {
    name: String,
    version: u64,
    #[serde(default)]
    stores: BTreeSet<String>,
}

/// Filesystem storage for one origin.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    paths: OriginPaths,
    write_lock: Arc<Mutex<()>>,
}

impl LocalProvider {
    /// Create a provider rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_paths(OriginPaths::new(root))
    }

    pub fn with_paths(paths: OriginPaths) -> Self {
        Self {
            paths,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn paths(&self) -> &OriginPaths {
        &self.paths
    }

    /// Discard the session area, as happens when a browsing session ends.
    pub async fn end_session(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_file_if_exists(&self.paths.key_value_file(KeyValueArea::Session)).await
    }

    /// Remove everything stored for this origin.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_dir_all(self.paths.root()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_area(&self, area: KeyValueArea) -> Result<BTreeMap<String, String>> {
        Ok(read_json(&self.paths.key_value_file(area))
            .await?
            .unwrap_or_default())
    }

    async fn read_meta(&self, database: &str) -> Result<Option<DatabaseMeta>> {
        read_json(&self.paths.meta_file(database)).await
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    async fn keys(&self, area: KeyValueArea) -> Result<Vec<String>> {
        Ok(self.read_area(area).await?.into_keys().collect())
    }

    async fn get_item(&self, area: KeyValueArea, key: &str) -> Result<Option<String>> {
        Ok(self.read_area(area).await?.remove(key))
    }

    async fn set_item(&self, area: KeyValueArea, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_area(area).await?;
        entries.insert(key.to_string(), value.to_string());
        write_json(&self.paths.key_value_file(area), &entries).await
    }

    async fn items(&self, area: KeyValueArea) -> Result<Vec<(String, String)>> {
        Ok(self.read_area(area).await?.into_iter().collect())
    }

    #[instrument(skip(self), fields(root = %self.paths.root().display()))]
    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let dir = self.paths.databases_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let component = entry.file_name().to_string_lossy().to_string();
            let Some(name) = decode_name(&component) else {
                debug!("Ignoring foreign entry {:?}", entry.path());
                continue;
            };
            let meta = self.read_meta(&name).await;
            match meta {
                Ok(Some(meta)) => found.push(DatabaseInfo {
                    name: meta.name,
                    version: meta.version,
                }),
                Ok(None) => debug!("Database directory without metadata: {:?}", entry.path()),
                // Still listed so that opening it fails for this database alone
                Err(e) => {
                    warn!(db = %name, error = %e, "Unreadable database metadata");
                    found.push(DatabaseInfo { name, version: 0 });
                }
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    #[instrument(skip(self, upgrade), fields(backend = "local"))]
    async fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: Option<&dyn UpgradeHandler>,
    ) -> Result<Box<dyn Database>> {
        let _guard = self.write_lock.lock().await;

        let existing = self.read_meta(name).await?;
        let current = existing.as_ref().map(|m| m.version).unwrap_or(0);
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

        let mut meta = existing.unwrap_or_else(|| DatabaseMeta {
            name: name.to_string(),
            version: 0,
            stores: BTreeSet::new(),
        });

        if requested > current {
            let change = VersionChange {
                old_version: current,
                new_version: requested,
            };
            let mut draft = SchemaDraft::new(meta.stores.iter().cloned());
            if let Some(handler) = upgrade {
                handler
                    .on_upgrade(change, &mut draft)
                    .map_err(|e| StorageError::Upgrade(format!("{}: {}", name, e)))?;
            }
            for store in draft.created() {
                write_json(&self.paths.store_file(name, store), &ObjectStore::new()).await?;
                meta.stores.insert(store.clone());
            }
            meta.version = requested;
            write_json(&self.paths.meta_file(name), &meta).await?;
            debug!("Upgraded '{}' from version {} to {}", name, current, requested);
        }

        Ok(Box::new(LocalDatabase {
            name: name.to_string(),
            version: meta.version,
            stores: meta.stores,
            provider: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

struct LocalDatabase {
    name: String,
    version: u64,
    stores: BTreeSet<String>,
    provider: LocalProvider,
    closed: AtomicBool,
}

#[async_trait]
impl Database for LocalDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.iter().cloned().collect()
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

        let mut staged = BTreeMap::new();
        for store in stores {
            if !self.stores.contains(store) {
                return Err(StorageError::NotFound(format!("{}/{}", self.name, store)));
            }
            let path = self.provider.paths.store_file(&self.name, store);
            let contents: ObjectStore = read_json(&path).await?.unwrap_or_default();
            staged.insert(store.clone(), contents);
        }

        Ok(Box::new(LocalTransaction {
            database: self.name.clone(),
            mode,
            provider: self.provider.clone(),
            staged,
            dirty: BTreeSet::new(),
            active: true,
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct LocalTransaction {
    database: String,
    mode: TransactionMode,
    provider: LocalProvider,
    staged: BTreeMap<String, ObjectStore>,
    dirty: BTreeSet<String>,
    active: bool,
}

impl LocalTransaction {
    fn check_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(StorageError::TransactionInactive(self.database.clone()))
        }
    }

    fn store_mut(&mut self, store: &str) -> Result<&mut ObjectStore> {
        self.check_active()?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(format!("{}/{}", self.database, store)));
        }
        let database = &self.database;
        let contents = self
            .staged
            .get_mut(store)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", database, store)))?;
        self.dirty.insert(store.to_string());
        Ok(contents)
    }
}

#[async_trait]
impl Transaction for LocalTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn get_all(&mut self, store: &str) -> Result<Vec<Record>> {
        self.check_active()?;
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
        self.check_active()?;
        self.active = false;

        if self.dirty.is_empty() {
            return Ok(());
        }

        let _guard = self.provider.write_lock.lock().await;
        let mut pending = PendingFiles::default();
        for store in std::mem::take(&mut self.dirty) {
            if let Some(contents) = self.staged.get(&store) {
                let path = self.provider.paths.store_file(&self.database, &store);
                pending.stage(path, contents).await?;
            }
        }
        pending.publish().await?;
        debug!(db = %self.database, "Committed transaction");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut pending = PendingFiles::default();
    pending.stage(path.to_path_buf(), value).await?;
    pending.publish().await
}

/// Temp files written ahead of a group of renames.
///
/// Nothing becomes visible until every file of the group is staged. Temp
/// files left over by an error or a dropped future are removed on drop.
#[derive(Default)]
struct PendingFiles {
    files: Vec<(PathBuf, PathBuf)>,
}

impl PendingFiles {
    async fn stage<T: Serialize + ?Sized>(&mut self, path: PathBuf, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        self.files.push((tmp, path));
        Ok(())
    }

    /// Rename every staged file into place.
    ///
    /// Runs on the blocking pool so that a caller giving up halfway cannot
    /// leave the group half renamed.
    async fn publish(mut self) -> Result<()> {
        let files = std::mem::take(&mut self.files);
        tokio::task::spawn_blocking(move || {
            for (i, (tmp, path)) in files.iter().enumerate() {
                if let Err(e) = std::fs::rename(tmp, path) {
                    for (rest, _) in &files[i..] {
                        let _ = std::fs::remove_file(rest);
                    }
                    return Err(e);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("commit task failed: {}", e)))??;
        Ok(())
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        for (tmp, _) in self.files.drain(..) {
            let _ = std::fs::remove_file(&tmp);
        }
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SchemaUpgrade;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_items(_: VersionChange, schema: &mut dyn SchemaUpgrade) -> Result<()> {
        if !schema.contains_store("items") {
            schema.create_store("items")?;
        }
        Ok(())
    }

    fn create_test_provider() -> (LocalProvider, TempDir) {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path().join("origin"));
        (provider, temp)
    }

    #[tokio::test]
    async fn test_key_values_persist_across_instances() {
        let (provider, temp) = create_test_provider();
        provider
            .set_item(KeyValueArea::Local, "theme", "dark")
            .await
            .unwrap();
        provider
            .set_item(KeyValueArea::Session, "tab", "3")
            .await
            .unwrap();

        let reopened = LocalProvider::new(temp.path().join("origin"));
        assert_eq!(
            reopened.get_item(KeyValueArea::Local, "theme").await.unwrap(),
            Some("dark".to_string())
        );
        assert_eq!(
            reopened.items(KeyValueArea::Session).await.unwrap(),
            vec![("tab".to_string(), "3".to_string())]
        );

        reopened.end_session().await.unwrap();
        assert!(provider.keys(KeyValueArea::Session).await.unwrap().is_empty());
        assert_eq!(provider.keys(KeyValueArea::Local).await.unwrap(), vec!["theme"]);
    }

    #[tokio::test]
    async fn test_no_databases_when_empty() {
        let (provider, _temp) = create_test_provider();
        assert!(provider.databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_and_commit_persist() {
        let (provider, temp) = create_test_provider();

        let db = provider
            .open("../notes", Some(3), Some(&create_items))
            .await
            .unwrap();
        let scope = vec!["items".to_string()];
        let mut tx = db
            .transaction(&scope, TransactionMode::ReadWrite)
            .await
            .unwrap();
        tx.put("items", json!({"id": 1, "text": "a"})).await.unwrap();
        tx.put("items", json!({"id": 2, "text": "b"})).await.unwrap();
        tx.commit().await.unwrap();
        db.close();

        let reopened = LocalProvider::new(temp.path().join("origin"));
        assert_eq!(
            reopened.databases().await.unwrap(),
            vec![DatabaseInfo {
                name: "../notes".to_string(),
                version: 3
            }]
        );

        let db = reopened.open("../notes", None, None).await.unwrap();
        assert_eq!(db.version(), 3);
        assert_eq!(db.store_names(), vec!["items".to_string()]);
        let mut tx = db
            .transaction(&scope, TransactionMode::ReadOnly)
            .await
            .unwrap();
        assert_eq!(
            tx.get_all("items").await.unwrap(),
            vec![json!({"id": 1, "text": "a"}), json!({"id": 2, "text": "b"})]
        );
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let (provider, _temp) = create_test_provider();
        let db = provider
            .open("notes", Some(1), Some(&create_items))
            .await
            .unwrap();
        let scope = vec!["items".to_string()];

        {
            let mut tx = db
                .transaction(&scope, TransactionMode::ReadWrite)
                .await
                .unwrap();
            tx.put("items", json!("lost")).await.unwrap();
        }

        let mut tx = db
            .transaction(&scope, TransactionMode::ReadOnly)
            .await
            .unwrap();
        assert!(tx.get_all("items").await.unwrap().is_empty());
    }

    fn create_a_and_b(_: VersionChange, schema: &mut dyn SchemaUpgrade) -> Result<()> {
        for store in ["a", "b"] {
            if !schema.contains_store(store) {
                schema.create_store(store)?;
            }
        }
        Ok(())
    }

    async fn read_store(provider: &LocalProvider, database: &str, store: &str) -> Vec<Record> {
        let db = provider.open(database, None, None).await.unwrap();
        let scope = vec![store.to_string()];
        let mut tx = db
            .transaction(&scope, TransactionMode::ReadOnly)
            .await
            .unwrap();
        tx.get_all(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_failed_commit_changes_no_store() {
        let (provider, _temp) = create_test_provider();
        let db = provider
            .open("notes", Some(1), Some(&create_a_and_b))
            .await
            .unwrap();
        let scope = vec!["a".to_string(), "b".to_string()];

        let mut tx = db
            .transaction(&scope, TransactionMode::ReadWrite)
            .await
            .unwrap();
        tx.put("a", json!("old-a")).await.unwrap();
        tx.put("b", json!("old-b")).await.unwrap();
        tx.commit().await.unwrap();

        // A directory where b's temp file goes makes staging b fail
        let blocked = provider
            .paths()
            .store_file("notes", "b")
            .with_extension("json.tmp");
        std::fs::create_dir_all(&blocked).unwrap();

        let mut tx = db
            .transaction(&scope, TransactionMode::ReadWrite)
            .await
            .unwrap();
        for store in ["a", "b"] {
            tx.clear(store).await.unwrap();
        }
        tx.put("a", json!("new-a")).await.unwrap();
        tx.put("b", json!("new-b")).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert_eq!(read_store(&provider, "notes", "a").await, vec![json!("old-a")]);
        assert_eq!(read_store(&provider, "notes", "b").await, vec![json!("old-b")]);
        let staged_a = provider
            .paths()
            .store_file("notes", "a")
            .with_extension("json.tmp");
        assert!(!staged_a.exists());
    }

    #[tokio::test]
    async fn test_unreadable_metadata_is_isolated() {
        let (provider, _temp) = create_test_provider();
        for name in ["a", "b", "c"] {
            provider
                .open(name, Some(1), Some(&create_items))
                .await
                .unwrap();
        }
        std::fs::write(provider.paths().meta_file("b"), b"{not json").unwrap();

        let listed = provider.databases().await.unwrap();
        assert_eq!(
            listed.iter().map(|info| info.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        assert!(provider.open("b", None, None).await.is_err());
        assert_eq!(provider.open("c", None, None).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_version_rules() {
        let (provider, _temp) = create_test_provider();
        provider.open("notes", Some(4), None).await.unwrap();

        let err = provider.open("notes", Some(2), None).await.err().unwrap();
        assert!(err.is_version_error());

        let db = provider.open("notes", None, None).await.unwrap();
        assert_eq!(db.version(), 4);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (provider, _temp) = create_test_provider();
        provider
            .set_item(KeyValueArea::Local, "k", "v")
            .await
            .unwrap();
        provider
            .open("notes", Some(1), Some(&create_items))
            .await
            .unwrap();

        provider.clear_all().await.unwrap();
        provider.clear_all().await.unwrap();

        assert!(provider.keys(KeyValueArea::Local).await.unwrap().is_empty());
        assert!(provider.databases().await.unwrap().is_empty());
    }
}
