//! On-disk layout for directory-backed origins.
//!
//! Each origin owns one directory:
//!
//! ```text
//! <root>/kv/local.json
//! <root>/kv/session.json
//! <root>/idb/<db>/meta.json
//! <root>/idb/<db>/stores/<store>.json
//! ```
//!
//! Origin, database and store names are arbitrary strings, so every path
//! component derived from a name is hex-encoded behind a `_` prefix.
//!
//! # Examples
//!
//! ```
//! use sessync_storage::{decode_name, encode_name};
//!
//! assert_eq!(encode_name("notes"), "_6e6f746573");
//! assert_eq!(decode_name("_6e6f746573").as_deref(), Some("notes"));
//! assert_eq!(encode_name(""), "_");
//! ```

use std::path::{Path, PathBuf};

use crate::traits::KeyValueArea;

/// Encode a name into a filesystem-safe path component.
pub fn encode_name(name: &str) -> String {
    format!("_{}", hex::encode(name.as_bytes()))
}

/// Reverse of [`encode_name`]. Returns `None` for foreign entries.
pub fn decode_name(component: &str) -> Option<String> {
    let encoded = component.strip_prefix('_')?;
    let bytes = hex::decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Paths of one origin's storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPaths {
    root: PathBuf,
}

impl OriginPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of `origin` below a shared data directory.
    pub fn for_origin(data_dir: &Path, origin: &str) -> Self {
        Self::new(data_dir.join("origins").join(encode_name(origin)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_value_file(&self, area: KeyValueArea) -> PathBuf {
        self.root.join("kv").join(format!("{}.json", area))
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.root.join("idb")
    }

    pub fn database_dir(&self, database: &str) -> PathBuf {
        self.databases_dir().join(encode_name(database))
    }

    pub fn meta_file(&self, database: &str) -> PathBuf {
        self.database_dir(database).join("meta.json")
    }

    pub fn store_file(&self, database: &str, store: &str) -> PathBuf {
        self.database_dir(database)
            .join("stores")
            .join(format!("{}.json", encode_name(store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roundtrip_hostile_names() {
        for name in ["", "../../etc", "a/b\\c", "données", "firebaseLocalStorageDb"] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains('.'));
            assert_eq!(decode_name(&encoded).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_entries() {
        assert_eq!(decode_name("meta.json"), None);
        assert_eq!(decode_name("_zz"), None);
        assert_eq!(decode_name(".DS_Store"), None);
    }

    #[test]
    fn test_layout() {
        let paths = OriginPaths::new("/data/o");
        assert_eq!(
            paths.key_value_file(KeyValueArea::Session),
            PathBuf::from("/data/o/kv/session.json")
        );
        assert_eq!(
            paths.store_file("n", "i"),
            PathBuf::from("/data/o/idb/_6e/stores/_69.json")
        );

        let origin = OriginPaths::for_origin(Path::new("/data"), "a");
        assert_eq!(origin.root(), Path::new("/data/origins/_61"));
    }
}
