//! Object store contents and schema drafts shared by the providers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, StorageError};
use crate::traits::{Record, SchemaUpgrade};

/// Records of one object store, keyed by an auto-increment generator.
///
/// Clearing a store does not reset the key generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStore {
    next_key: u64,
    records: BTreeMap<u64, Record>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under the next key and return that key.
    pub fn put(&mut self, record: Record) -> u64 {
        self.next_key += 1;
        self.records.insert(self.next_key, record);
        self.next_key
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records in key order.
    pub fn records(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Working copy of a database schema during a version change.
///
/// Stores are only ever added; the provider applies `created()` once the
/// upgrade handler has returned successfully.
#[derive(Debug, Clone, Default)]
pub struct SchemaDraft {
    existing: BTreeSet<String>,
    created: BTreeSet<String>,
}

impl SchemaDraft {
    pub fn new(existing: impl IntoIterator<Item = String>) -> Self {
        Self {
            existing: existing.into_iter().collect(),
            created: BTreeSet::new(),
        }
    }

    /// Stores created by the upgrade handler, sorted.
    pub fn created(&self) -> impl Iterator<Item = &String> {
        self.created.iter()
    }
}

impl SchemaUpgrade for SchemaDraft {
    fn store_names(&self) -> Vec<String> {
        self.existing.union(&self.created).cloned().collect()
    }

    fn create_store(&mut self, name: &str) -> Result<()> {
        if self.existing.contains(name) || self.created.contains(name) {
            return Err(StorageError::Upgrade(format!(
                "object store '{}' already exists",
                name
            )));
        }
        self.created.insert(name.to_string());
        Ok(())
    }
}
