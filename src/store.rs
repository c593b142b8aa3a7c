//! Local persisted state
//!
//! A small string key/value store standing in for browser local storage.
//! `FileStore` keeps everything in one JSON object on disk (owner-only
//! permissions); `MemoryStore` is process-local.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::providers::ProviderError;

/// Bearer token (JSON `StoredTokens`)
pub const TOKEN_KEY: &str = "cloudnest.drive_token";
/// `"true"` while a Drive account is linked
pub const LINKED_KEY: &str = "cloudnest.drive_linked";
/// JSON array of featured entries
pub const FEATURED_KEY: &str = "cloudnest.featured_files";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ProviderError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ProviderError>;
    fn remove(&self, key: &str) -> Result<(), ProviderError>;
}

/// Read and deserialize a JSON value; a corrupt value reads as absent
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, ProviderError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Discarding unreadable value for {}: {}", key, e);
            Ok(None)
        }
    }
}

pub fn set_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), ProviderError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| ProviderError::Storage(format!("Failed to serialize {}: {}", key, e)))?;
    store.set(key, &raw)
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ProviderError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// JSON-file backed store
///
/// The whole map is rewritten on every change; the file is tiny.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!("Local storage at {:?} is corrupt, starting empty: {}", path, e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), ProviderError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| ProviderError::Storage(format!("Failed to serialize local storage: {}", e)))?;
        fs::write(&self.path, content)?;
        ensure_secure_permissions(&self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), ProviderError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut values);
        self.persist(&values)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ProviderError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), ProviderError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Restrict a file holding credentials to its owner
fn ensure_secure_permissions(path: &Path) -> Result<(), ProviderError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get(LINKED_KEY).unwrap(), None);
        store.set(LINKED_KEY, "true").unwrap();
        assert_eq!(store.get(LINKED_KEY).unwrap().as_deref(), Some("true"));
        store.remove(LINKED_KEY).unwrap();
        assert_eq!(store.get(LINKED_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local_storage.json");

        let store = FileStore::open(&path).unwrap();
        store.set(TOKEN_KEY, "{\"a\":1}").unwrap();
        store.set(LINKED_KEY, "true").unwrap();
        store.remove(LINKED_KEY).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reopened.get(LINKED_KEY).unwrap(), None);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_storage.json");
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_json_helpers_ignore_garbage() {
        let store = MemoryStore::new();
        store.set(FEATURED_KEY, "[oops").unwrap();
        let parsed: Option<Vec<String>> = get_json(&store, FEATURED_KEY).unwrap();
        assert!(parsed.is_none());

        set_json(&store, FEATURED_KEY, &vec!["a".to_string()]).unwrap();
        let parsed: Option<Vec<String>> = get_json(&store, FEATURED_KEY).unwrap();
        assert_eq!(parsed, Some(vec!["a".to_string()]));
    }
}
