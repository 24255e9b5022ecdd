// src/cache/mod.rs

pub mod store;

pub use store::{CacheStore, FileStore, MemoryStore};

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Source of "now" for entry ages.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cached payload and when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub written_at: DateTime<Utc>,
    pub value: T,
}

/// Age-bounded cache over a [`CacheStore`].
///
/// Entries are stored as JSON under `<prefix>.<key>`. The prefix carries a
/// schema version: bump it whenever the record shape changes so old entries
/// are never decoded as new ones.
pub struct TimedCache<S> {
    store: S,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl<S: CacheStore> TimedCache<S> {
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    /// The payload under `key` if it is at most `max_age` old.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        self.get_entry(key, max_age).map(|e| e.value)
    }

    pub fn get_entry<T: DeserializeOwned>(
        &self,
        key: &str,
        max_age: Duration,
    ) -> Option<CacheEntry<T>> {
        let entry = self.get_stale::<T>(key)?;
        let age_ms = (self.clock.now() - entry.written_at).num_milliseconds();
        let max_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if age_ms <= max_ms {
            Some(entry)
        } else {
            debug!(key, age_ms, max_ms, "cache entry expired");
            None
        }
    }

    /// The entry under `key` regardless of age.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get(&self.scoped(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(key, error = %e, "ignoring undecodable cache entry");
                None
            }
        }
    }

    /// Store `value` stamped with the current time. Storage failures are
    /// logged and swallowed; the next read simply misses.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_set(key, value) {
            warn!(key, error = %e, "cache write rejected");
        }
    }

    pub fn try_set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let entry = CacheEntry {
            written_at: self.clock.now(),
            value,
        };
        let raw = serde_json::to_string(&entry)?;
        self.store.set(&self.scoped(key), &raw)
    }

    pub fn clear(&self, key: &str) {
        if let Err(e) = self.store.remove(&self.scoped(key)) {
            warn!(key, error = %e, "cache clear failed");
        }
    }

    /// Drop every stored entry written under a different prefix.
    /// Returns how many were removed.
    pub fn purge_stale_versions(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cannot list cache entries");
                return 0;
            }
        };
        let own = format!("{}.", self.prefix);
        let mut removed = 0;
        for key in keys.iter().filter(|k| !k.starts_with(&own)) {
            match self.store.remove(key) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "cannot purge cache entry"),
            }
        }
        if removed > 0 {
            debug!(removed, prefix = %self.prefix, "purged entries from other cache versions");
        }
        removed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{Dataset, Record, Value};
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn sample() -> Dataset {
        vec![vec![("equipo", Value::from("A")), ("pts", Value::Number(10.0))]
            .into_iter()
            .collect::<Record>()]
    }

    #[test]
    fn test_fresh_then_expired() {
        let clock = ManualClock::new();
        let cache = TimedCache::new(MemoryStore::new(), "liga_v1").with_clock(clock.clone());
        let max_age = Duration::from_millis(1000);

        cache.set("k", &sample());
        assert_eq!(cache.get::<Dataset>("k", max_age), Some(sample()));

        clock.advance(Duration::from_millis(1000));
        assert_eq!(cache.get::<Dataset>("k", max_age), Some(sample()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<Dataset>("k", max_age), None);

        // expired but still stored
        let stale = cache.get_stale::<Dataset>("k").unwrap();
        assert_eq!(stale.value, sample());
    }

    #[test]
    fn test_set_overwrites_and_restamps() {
        let clock = ManualClock::new();
        let cache = TimedCache::new(MemoryStore::new(), "liga_v1").with_clock(clock.clone());

        cache.set("k", &1u32);
        clock.advance(Duration::from_secs(5));
        cache.set("k", &2u32);
        assert_eq!(cache.get::<u32>("k", Duration::from_secs(1)), Some(2));
    }

    #[test]
    fn test_clear_removes_entry() {
        let cache = TimedCache::new(MemoryStore::new(), "liga_v1");
        cache.set("k", &sample());
        cache.clear("k");
        assert_eq!(cache.get_stale::<Dataset>("k"), None);
        // clearing twice is harmless
        cache.clear("k");
    }

    #[test]
    fn test_rejected_write_is_absorbed() {
        let cache = TimedCache::new(MemoryStore::with_capacity(8), "liga_v1");
        cache.set("k", &sample());
        assert!(cache.try_set("k", &sample()).is_err());
        assert_eq!(cache.get::<Dataset>("k", Duration::from_secs(60)), None);
    }

    #[test]
    fn test_undecodable_entry_is_a_miss() {
        let store = MemoryStore::new();
        store.set("liga_v1.k", "{not json").unwrap();
        let cache = TimedCache::new(store, "liga_v1");
        assert_eq!(cache.get::<Dataset>("k", Duration::from_secs(60)), None);
    }

    #[test]
    fn test_versioned_prefix_isolates_entries() {
        let store = MemoryStore::new();
        TimedCache::new(&store, "liga_v1").set("standings", &sample());

        let v2 = TimedCache::new(&store, "liga_v2");
        assert_eq!(v2.get::<Dataset>("standings", Duration::from_secs(60)), None);
        v2.set("standings", &Vec::<Record>::new());

        assert_eq!(v2.purge_stale_versions(), 1);
        assert_eq!(store.keys().unwrap(), vec!["liga_v2.standings".to_string()]);
    }

    #[test]
    fn test_survives_restart_with_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        TimedCache::new(FileStore::new(tmp.path()).unwrap(), "liga_v1").set("scorers", &sample());

        let reopened = TimedCache::new(FileStore::new(tmp.path()).unwrap(), "liga_v1");
        assert_eq!(
            reopened.get::<Dataset>("scorers", Duration::from_secs(60)),
            Some(sample())
        );
    }

    #[test]
    fn test_purge_keeps_own_entries_with_unusual_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = TimedCache::new(FileStore::new(tmp.path()).unwrap(), "liga v1/2024");
        cache.set("tabla general", &sample());
        cache.set("tabla_general", &Vec::<Record>::new());

        let reopened = TimedCache::new(FileStore::new(tmp.path()).unwrap(), "liga v1/2024");
        assert_eq!(reopened.purge_stale_versions(), 0);
        assert_eq!(
            reopened.get::<Dataset>("tabla general", Duration::from_secs(60)),
            Some(sample())
        );
        assert_eq!(
            reopened.get::<Dataset>("tabla_general", Duration::from_secs(60)),
            Some(Vec::new())
        );
    }
}
