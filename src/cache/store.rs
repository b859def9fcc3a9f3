//! In-memory cache store keyed by string
//!
//! Holds the last successfully fetched value for each key together with the
//! instant it was fetched. Entries are only ever created or overwritten;
//! nothing is evicted, so the store grows with the number of distinct keys.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// A cached value and the instant it was fetched
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The cached data
    pub value: V,
    /// When the data was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Concurrent map from cache key to [`CacheEntry`]
///
/// Reads and writes may come from any number of tasks at once. A write
/// replaces both the value and the timestamp; there is no other mutation.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Writes `value` under `key`, stamping it with `now`
    ///
    /// Creates the entry if missing, otherwise overwrites it.
    pub fn write(&self, key: &str, value: V, now: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: now,
            },
        );
    }

    /// Lists every key with its fetch timestamp, sorted by key
    pub fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().fetched_at))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of keys currently cached
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> CacheStore<V> {
    /// Reads the entry for `key`, if one has ever been written
    pub fn read(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}
