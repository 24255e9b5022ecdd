use crate::error::StoreError;
use glob::{glob, Pattern};
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::NamedTempFile;
use tracing::warn;
use url::form_urlencoded;

/// Durable string key-value storage behind the timed cache.
///
/// Writes may be rejected (full disk, capacity ceiling); callers decide
/// whether that matters.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<S: CacheStore + ?Sized> CacheStore for &S {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

/// One `<key>.json` file per entry under `dir`, replaced atomically.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for(key)))
    }
}

/// Keys become file names through form-urlencoding, which is reversible and
/// never yields a path separator.
fn file_stem_for(key: &str) -> String {
    form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

fn key_for_stem(stem: &str) -> Option<String> {
    form_urlencoded::parse(stem.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // write to a temp file in the same dir, then rename over the entry
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}/*.json", Pattern::escape(&self.dir.to_string_lossy()));
        let paths = glob(&pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut keys = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read cache entry");
                    continue;
                }
            };
            match path.file_stem().and_then(|s| s.to_str()).and_then(key_for_stem) {
                Some(key) => keys.push(key),
                None => warn!(path = %path.display(), "ignoring unrecognised cache file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store with an optional byte ceiling, standing in for durable
/// storage in tests and for hosts without a writable disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any write that would push the summed value sizes past `bytes`.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // a panicked writer cannot leave a half-written String behind
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if let Some(limit) = self.capacity {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > limit {
                return Err(StoreError::CapacityExceeded { needed, limit });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_roundtrip_and_remove() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("cache")).unwrap();

        assert_eq!(store.get("liga_v1.standings").unwrap(), None);
        store.set("liga_v1.standings", "[1]").unwrap();
        store.set("liga_v1.standings", "[2]").unwrap();
        assert_eq!(store.get("liga_v1.standings").unwrap().as_deref(), Some("[2]"));

        store.remove("liga_v1.standings").unwrap();
        assert_eq!(store.get("liga_v1.standings").unwrap(), None);
        // removing a missing key is fine
        store.remove("liga_v1.standings").unwrap();
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let tmp = tempdir().unwrap();
        {
            let store = FileStore::new(tmp.path()).unwrap();
            store.set("liga_v1.scorers", "[]").unwrap();
            store.set("liga_v0.scorers", "[]").unwrap();
        }
        let reopened = FileStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.get("liga_v1.scorers").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            reopened.keys().unwrap(),
            vec!["liga_v0.scorers".to_string(), "liga_v1.scorers".to_string()]
        );
    }

    #[test]
    fn test_file_store_encodes_keys() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.set("liga_v1.../etc/passwd", "x").unwrap();
        assert!(tmp.path().join("liga_v1...%2Fetc%2Fpasswd.json").is_file());
        assert_eq!(store.keys().unwrap(), vec!["liga_v1.../etc/passwd".to_string()]);
    }

    #[test]
    fn test_file_store_keeps_similar_keys_apart() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.set("liga v1.tabla general", "[1]").unwrap();
        store.set("liga v1.tabla_general", "[2]").unwrap();
        store.set("liga v1.tabla+general", "[3]").unwrap();

        assert_eq!(store.get("liga v1.tabla general").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("liga v1.tabla_general").unwrap().as_deref(), Some("[2]"));
        assert_eq!(store.get("liga v1.tabla+general").unwrap().as_deref(), Some("[3]"));
        assert_eq!(
            store.keys().unwrap(),
            vec![
                "liga v1.tabla general".to_string(),
                "liga v1.tabla+general".to_string(),
                "liga v1.tabla_general".to_string(),
            ]
        );
    }

    #[test]
    fn test_memory_store_capacity() {
        let store = MemoryStore::with_capacity(10);
        store.set("a", "12345").unwrap();
        // overwriting the same key only counts the new value
        store.set("a", "1234567").unwrap();

        let err = store.set("b", "12345").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded {
                needed: 12,
                limit: 10
            }
        ));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.len(), 1);
    }
}
