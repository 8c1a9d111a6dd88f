//! The snapshot value and its persisted form.
//!
//! A [`Snapshot`] is a plain, fully serializable copy of an origin's storage.
//! Its JSON layout is the compatibility contract with previously exported
//! sessions:
//!
//! ```json
//! {
//!   "localStorage":   { "theme": "dark" },
//!   "sessionStorage": {},
//!   "indexedDB":      { "notes": { "items": [ { "id": 1, "text": "a" } ] } }
//! }
//! ```
//!
//! Every section may be absent or `null` on input. The `*Data` key names used
//! by the export message ([`SessionExport`]) are accepted as aliases.
//!
//! All maps are `BTreeMap`s, so a snapshot iterates (and is imported) in name
//! order, not in the order its JSON happened to list databases and stores.
//! Records within a store keep their order.

use serde::{Deserialize, Deserializer, Serialize};
use sessync_storage::{KeyValueArea, Record};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Flat key-value area contents.
pub type KeyValueMap = BTreeMap<String, String>;

/// Object store name to ordered records.
pub type StoreMap = BTreeMap<String, Vec<Record>>;

/// Database name to its stores.
pub type StructuredStores = BTreeMap<String, StoreMap>;

/// Serializable aggregate of an origin's storage at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(
        rename = "localStorage",
        alias = "localStorageData",
        default,
        deserialize_with = "null_as_default"
    )]
    pub local: KeyValueMap,

    #[serde(
        rename = "sessionStorage",
        alias = "sessionStorageData",
        default,
        deserialize_with = "null_as_default"
    )]
    pub session: KeyValueMap,

    #[serde(
        rename = "indexedDB",
        alias = "indexedDBData",
        default,
        deserialize_with = "null_as_default"
    )]
    pub structured: StructuredStores,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_values(&self, area: KeyValueArea) -> &KeyValueMap {
        match area {
            KeyValueArea::Local => &self.local,
            KeyValueArea::Session => &self.session,
        }
    }

    pub fn key_values_mut(&mut self, area: KeyValueArea) -> &mut KeyValueMap {
        match area {
            KeyValueArea::Local => &mut self.local,
            KeyValueArea::Session => &mut self.session,
        }
    }

    /// Set the records of one store, replacing whatever was there.
    pub fn set_records(&mut self, database: &str, store: &str, records: Vec<Record>) {
        self.structured
            .entry(database.to_string())
            .or_default()
            .insert(store.to_string(), records);
    }

    pub fn records(&self, database: &str, store: &str) -> Option<&[Record]> {
        self.structured
            .get(database)?
            .get(store)
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.session.is_empty() && self.structured.is_empty()
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            local_keys: self.local.len(),
            session_keys: self.session.len(),
            databases: self.structured.len(),
            stores: self.structured.values().map(BTreeMap::len).sum(),
            records: self
                .structured
                .values()
                .flat_map(BTreeMap::values)
                .map(Vec::len)
                .sum(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Size summary of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub local_keys: usize,
    pub session_keys: usize,
    pub databases: usize,
    pub stores: usize,
    pub records: usize,
}

impl fmt::Display for SnapshotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} local keys, {} session keys, {} databases, {} stores, {} records",
            self.local_keys, self.session_keys, self.databases, self.stores, self.records
        )
    }
}

/// Snapshot as carried by the guest's export message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    #[serde(default)]
    pub local_storage_data: KeyValueMap,
    #[serde(default)]
    pub session_storage_data: KeyValueMap,
    #[serde(rename = "indexedDBData", default)]
    pub indexed_db_data: StructuredStores,
}

impl From<Snapshot> for SessionExport {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            local_storage_data: snapshot.local,
            session_storage_data: snapshot.session,
            indexed_db_data: snapshot.structured,
        }
    }
}

impl From<SessionExport> for Snapshot {
    fn from(export: SessionExport) -> Self {
        Self {
            local: export.local_storage_data,
            session: export.session_storage_data,
            structured: export.indexed_db_data,
        }
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

/// Write a snapshot as pretty JSON, zstd-compressed when the path ends in `.zst`.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;

    if is_compressed(path) {
        let mut encoder = zstd::stream::Encoder::new(file, 3)?;
        serde_json::to_writer(&mut encoder, snapshot)?;
        encoder.finish()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`] (or any compatible JSON).
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let file = File::open(path)?;
    if is_compressed(path) {
        let decoder = zstd::stream::Decoder::new(BufReader::new(file))?;
        Ok(serde_json::from_reader(decoder)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.local.insert("theme".to_string(), "dark".to_string());
        snapshot.session.insert("tab".to_string(), "3".to_string());
        snapshot.set_records("notes", "items", vec![json!({"id": 1, "text": "a"})]);
        snapshot.set_records("notes", "tags", vec![]);
        snapshot
    }

    #[test]
    fn test_wire_layout() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "localStorage": {"theme": "dark"},
                "sessionStorage": {"tab": "3"},
                "indexedDB": {"notes": {"items": [{"id": 1, "text": "a"}], "tags": []}}
            })
        );
    }

    #[test]
    fn test_missing_and_null_sections() {
        let snapshot = Snapshot::from_json(r#"{"localStorage": null, "indexedDB": {}}"#).unwrap();
        assert!(snapshot.is_empty());

        let snapshot = Snapshot::from_json("{}").unwrap();
        assert_eq!(snapshot, Snapshot::new());
    }

    #[test]
    fn test_export_message_aliases() {
        let export = SessionExport::from(sample());
        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"localStorageData\""));
        assert!(json.contains("\"indexedDBData\""));

        // The export payload can be fed straight back as a snapshot
        let snapshot = Snapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, sample());
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(
            stats,
            SnapshotStats {
                local_keys: 1,
                session_keys: 1,
                databases: 1,
                stores: 2,
                records: 1,
            }
        );
        assert_eq!(
            stats.to_string(),
            "1 local keys, 1 session keys, 1 databases, 2 stores, 1 records"
        );
    }

    #[test]
    fn test_file_roundtrip_plain_and_compressed() {
        let temp = TempDir::new().unwrap();
        for name in ["session.json", "nested/session.json.zst"] {
            let path = temp.path().join(name);
            write_snapshot(&path, &sample()).unwrap();
            assert_eq!(read_snapshot(&path).unwrap(), sample());
        }
    }

    #[test]
    fn test_databases_iterate_in_name_order() {
        let snapshot = Snapshot::from_json(
            r#"{"indexedDB": {"zeta": {"s": [3, 1, 2]}, "alpha": {"s": []}}}"#,
        )
        .unwrap();
        assert_eq!(
            snapshot.structured.keys().collect::<Vec<_>>(),
            vec!["alpha", "zeta"]
        );
        assert_eq!(
            snapshot.records("zeta", "s"),
            Some(&[json!(3), json!(1), json!(2)][..])
        );
    }
}
