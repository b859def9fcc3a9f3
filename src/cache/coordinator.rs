//! Read-through fetch coordinator with stale-on-error fallback
//!
//! [`FetchCoordinator::get`] serves a fresh cache entry without touching the
//! upstream, refreshes an expired or missing entry through the caller's fetch
//! function, and falls back to the expired entry when that refresh fails.
//! A [`FetchError`] surfaces only when a fetch fails and nothing was ever
//! cached for the key.
//!
//! Concurrent misses on the same key each run their own fetch and the last
//! write wins. Use [`CoalescingCoordinator`](super::CoalescingCoordinator)
//! when one fetch per key is required.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::store::{CacheEntry, CacheStore};

/// Where a returned value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Just fetched from the upstream
    Fresh,
    /// Served from a cache entry still within its TTL
    Cached,
    /// The refresh failed; served from an expired cache entry
    Stale,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Fresh => "fresh",
            Origin::Cached => "cached",
            Origin::Stale => "stale",
        };
        f.write_str(s)
    }
}

impl Origin {
    /// The less trustworthy of two origins: stale, then cached, then fresh
    pub fn weaker(self, other: Origin) -> Origin {
        fn rank(origin: Origin) -> u8 {
            match origin {
                Origin::Stale => 0,
                Origin::Cached => 1,
                Origin::Fresh => 2,
            }
        }
        if rank(other) < rank(self) {
            other
        } else {
            self
        }
    }
}

/// Value returned by a successful [`FetchCoordinator::get`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<V> {
    /// The payload, freshly fetched or read from the cache
    pub value: V,
    /// How the payload was obtained
    pub origin: Origin,
    /// When the payload was fetched from the upstream
    pub fetched_at: DateTime<Utc>,
}

impl<V> FetchOutcome<V> {
    /// Whether this value came from an expired entry after a failed refresh
    pub fn is_stale(&self) -> bool {
        self.origin == Origin::Stale
    }

    /// Converts the payload, keeping origin and timestamp
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> FetchOutcome<U> {
        FetchOutcome {
            value: f(self.value),
            origin: self.origin,
            fetched_at: self.fetched_at,
        }
    }

    /// Fallible version of [`map`](Self::map)
    pub fn try_map<U, E>(self, f: impl FnOnce(V) -> Result<U, E>) -> Result<FetchOutcome<U>, E> {
        Ok(FetchOutcome {
            value: f(self.value)?,
            origin: self.origin,
            fetched_at: self.fetched_at,
        })
    }
}

/// A fetch failed and there was no cached value to fall back on
///
/// The upstream failure is kept behind an `Arc` so the same error can be
/// handed to several waiters.
#[derive(Debug, Error)]
#[error("failed to fetch {key}: {source}")]
pub struct FetchError<E> {
    key: String,
    #[source]
    source: Arc<E>,
}

impl<E> FetchError<E> {
    pub fn new(key: impl Into<String>, source: E) -> Self {
        Self::shared(key, Arc::new(source))
    }

    pub(crate) fn shared(key: impl Into<String>, source: Arc<E>) -> Self {
        Self {
            key: key.into(),
            source,
        }
    }

    /// The cache key whose fetch failed
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The adapter's own error
    pub fn upstream(&self) -> &E {
        &self.source
    }
}

impl<E> Clone for FetchError<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            source: Arc::clone(&self.source),
        }
    }
}

/// One line of the cache status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub key: String,
    /// Whole seconds since the entry was fetched
    pub age_seconds: u64,
    /// Whether a `get` right now would try to refresh this entry
    pub expired: bool,
}

/// Get-or-fetch over a shared [`CacheStore`]
///
/// Cloning is cheap and clones share the same store and clock.
pub struct FetchCoordinator<V> {
    store: Arc<CacheStore<V>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<V> Clone for FetchCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
        }
    }
}

impl<V> fmt::Debug for FetchCoordinator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("entries", &self.store.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V: Clone> FetchCoordinator<V> {
    /// Creates a coordinator over a fresh store using the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Arc::new(CacheStore::new()), Arc::new(SystemClock), ttl)
    }

    /// Creates a coordinator over an existing store and clock
    pub fn with_store(store: Arc<CacheStore<V>>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// The TTL applied by [`get`](Self::get)
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }

    /// Current time on the coordinator's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the value for `key`, fetching it if missing or older than the TTL
    pub async fn get<F, Fut, E>(&self, key: &str, fetch: F) -> Result<FetchOutcome<V>, FetchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        self.get_with_ttl(key, self.ttl, fetch).await
    }

    /// Same as [`get`](Self::get) with a TTL chosen by the caller
    ///
    /// The TTL belongs to the call, not to the entry: callers sharing a key
    /// with different TTLs will disagree on whether it is fresh.
    pub async fn get_with_ttl<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<FetchOutcome<V>, FetchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        self.resolve(key, ttl, || async move { fetch().await.map_err(Arc::new) })
            .await
    }

    /// The get-or-fetch state machine; errors arrive already shared
    pub(crate) async fn resolve<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<FetchOutcome<V>, FetchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Arc<E>>>,
        E: fmt::Display,
    {
        let existing = self.store.read(key);

        if let Some(entry) = &existing {
            if self.is_fresh(entry, ttl) {
                debug!(key, "cache hit");
                return Ok(FetchOutcome {
                    value: entry.value.clone(),
                    origin: Origin::Cached,
                    fetched_at: entry.fetched_at,
                });
            }
        }

        debug!(key, expired = existing.is_some(), "cache miss, fetching");

        match fetch().await {
            Ok(value) => {
                let now = self.clock.now();
                self.store.write(key, value.clone(), now);
                Ok(FetchOutcome {
                    value,
                    origin: Origin::Fresh,
                    fetched_at: now,
                })
            }
            Err(err) => match existing {
                Some(entry) => {
                    warn!(key, error = %err, "fetch failed, serving stale entry");
                    Ok(FetchOutcome {
                        value: entry.value,
                        origin: Origin::Stale,
                        fetched_at: entry.fetched_at,
                    })
                }
                None => {
                    warn!(key, error = %err, "fetch failed with nothing cached");
                    Err(FetchError::shared(key, err))
                }
            },
        }
    }

    /// Reports every cached key with its age, sorted by key
    ///
    /// Never fetches and never writes.
    pub fn introspect(&self) -> Vec<EntryStatus> {
        let now = self.clock.now();
        self.store
            .entries()
            .into_iter()
            .map(|(key, fetched_at)| {
                let age = age_at(now, fetched_at);
                EntryStatus {
                    key,
                    age_seconds: age.as_secs(),
                    expired: age >= self.ttl,
                }
            })
            .collect()
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, ttl: Duration) -> bool {
        age_at(self.clock.now(), entry.fetched_at) < ttl
    }
}

/// Age of an entry; timestamps from the future count as zero
fn age_at(now: DateTime<Utc>, fetched_at: DateTime<Utc>) -> Duration {
    (now - fetched_at).to_std().unwrap_or(Duration::ZERO)
}
