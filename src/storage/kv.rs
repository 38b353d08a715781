//! Local key-value storage backends.
//!
//! - [`InMemoryKv`]: process-local map, for tests and ephemeral sessions
//! - [`DirectoryKv`]: one file per key under a directory, survives restarts

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::traits::{KeyValueStorage, StorageError};

#[derive(Debug, Default)]
pub struct InMemoryKv {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStorage for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// Directory-backed storage: key `k` lives in `<root>/<k>.json`.
///
/// Keys are restricted to `[A-Za-z0-9_.-]` so they cannot escape the root.
#[derive(Debug)]
pub struct DirectoryKv {
    root: PathBuf,
}

impl DirectoryKv {
    /// Open (creating if needed) a storage directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {}", root.display(), e))
        })?;
        debug!(root = %root.display(), "Local storage directory opened");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::MalformedEntry {
                key: key.to_string(),
                reason: "invalid storage key".to_string(),
            });
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl KeyValueStorage for DirectoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Unavailable(format!("read {}: {}", path.display(), e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| StorageError::Unavailable(format!("write {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Unavailable(format!("remove {}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_set_get_remove() {
        let kv = InMemoryKv::new();
        assert!(kv.is_empty());

        kv.set("erp_cxc_data", "[]").unwrap();
        assert_eq!(kv.get("erp_cxc_data").unwrap().as_deref(), Some("[]"));
        assert_eq!(kv.keys(), vec!["erp_cxc_data".to_string()]);

        kv.remove("erp_cxc_data").unwrap();
        assert_eq!(kv.get("erp_cxc_data").unwrap(), None);
        kv.remove("erp_cxc_data").unwrap();
    }

    #[test]
    fn test_directory_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        {
            let kv = DirectoryKv::open(dir.path()).unwrap();
            kv.set("erp_logistica", r#"{"1":{"id":"1"}}"#).unwrap();
        }

        let reopened = DirectoryKv::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("erp_logistica").unwrap().as_deref(),
            Some(r#"{"1":{"id":"1"}}"#)
        );
        assert_eq!(reopened.get("erp_missing").unwrap(), None);

        reopened.remove("erp_logistica").unwrap();
        assert_eq!(reopened.get("erp_logistica").unwrap(), None);
        reopened.remove("erp_logistica").unwrap();
    }

    #[test]
    fn test_directory_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let kv = DirectoryKv::open(dir.path()).unwrap();

        assert!(matches!(kv.set("../evil", "x"), Err(StorageError::MalformedEntry { .. })));
        assert!(matches!(kv.get("a/b"), Err(StorageError::MalformedEntry { .. })));
        assert!(matches!(kv.get(""), Err(StorageError::MalformedEntry { .. })));
    }
}
