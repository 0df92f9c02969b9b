//! Local content store for large-object proxying.
//!
//! Values too large to embed in an execution unit are written here under a
//! task-scoped unique key, and the embedded payload carries only a small
//! locator record. Entries are one-shot: resolving a locator evicts the
//! backing file, matching the at-most-one-result task model.
//!
//! The store is keyed by directory, so it is backend-agnostic: any consumer
//! that can reach the directory (today, the local-subprocess runner) can
//! resolve a locator.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A content store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

/// A small record standing in for a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Directory of the store that holds the value.
    pub store: PathBuf,
    /// Unique key of the entry within the store.
    pub key: String,
    /// Size of the stored bytes, for diagnostics.
    pub len: u64,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            DispatchError::Serialization(format!(
                "failed to create content store '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write bytes under a fresh unique key and return its locator.
    pub fn put(&self, bytes: &[u8]) -> Result<Locator> {
        let key = Uuid::new_v4().simple().to_string();
        let path = self.dir.join(&key);
        fs::write(&path, bytes).map_err(|e| {
            DispatchError::Serialization(format!(
                "failed to write content store entry '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Locator {
            store: self.dir.clone(),
            key,
            len: bytes.len() as u64,
        })
    }
}

/// Read the bytes a locator points at, evicting the entry afterwards.
pub fn resolve(locator: &Locator) -> Result<Vec<u8>> {
    let path = locator.store.join(&locator.key);
    let bytes = fs::read(&path).map_err(|e| {
        DispatchError::Serialization(format!(
            "failed to resolve content store entry '{}': {}",
            path.display(),
            e
        ))
    })?;
    // One-shot entries; a failed removal is harmless.
    let _ = fs::remove_file(&path);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_resolve_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::at(temp_dir.path().join("store")).unwrap();

        let locator = store.put(b"hello world").unwrap();
        assert_eq!(locator.len, 11);
        assert_eq!(locator.store, store.dir());

        let bytes = resolve(&locator).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn test_resolve_evicts_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::at(temp_dir.path().join("store")).unwrap();

        let locator = store.put(b"once").unwrap();
        resolve(&locator).unwrap();

        let err = resolve(&locator).unwrap_err();
        assert!(err.to_string().contains("failed to resolve"));
    }

    #[test]
    fn test_entries_get_unique_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContentStore::at(temp_dir.path().join("store")).unwrap();

        let a = store.put(b"a").unwrap();
        let b = store.put(b"a").unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_locator_serializes_as_json() {
        let locator = Locator {
            store: PathBuf::from("/tmp/store"),
            key: "abc123".to_string(),
            len: 42,
        };
        let json = serde_json::to_string(&locator).unwrap();
        assert!(json.contains("\"key\":\"abc123\""));

        let parsed: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, locator);
    }
}
