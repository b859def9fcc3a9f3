//! In-flight request deduplication
//!
//! [`CoalescingCoordinator`] wraps a [`FetchCoordinator`] and keeps a map from
//! cache key to the fetch currently running for it. A caller that misses the
//! cache while a fetch for the same key is pending awaits that fetch instead
//! of starting its own, so each key is fetched at most once at a time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::debug;

use super::coordinator::{EntryStatus, FetchCoordinator, FetchError, FetchOutcome};

type PendingFetch<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// A fetch in progress and how many callers are awaiting it
struct Slot<V, E> {
    fetch: PendingFetch<V, E>,
    waiters: usize,
}

/// Releases one caller's hold on a slot, even if the caller is dropped
///
/// The last waiter out removes the slot, which drops the fetch with it. A
/// slot that has since been replaced by a newer fetch is left alone.
struct WaiterGuard<V, E> {
    in_flight: Arc<DashMap<String, Slot<V, E>>>,
    key: String,
    fetch: PendingFetch<V, E>,
}

impl<V, E> WaiterGuard<V, E> {
    /// Clears the slot once its fetch has finished so later misses start anew
    fn settled(&self) {
        self.in_flight
            .remove_if(&self.key, |_, slot| slot.fetch.ptr_eq(&self.fetch));
    }
}

impl<V, E> Drop for WaiterGuard<V, E> {
    fn drop(&mut self) {
        let removed = self.in_flight.remove_if_mut(&self.key, |_, slot| {
            if !slot.fetch.ptr_eq(&self.fetch) {
                return false;
            }
            slot.waiters = slot.waiters.saturating_sub(1);
            slot.waiters == 0
        });
        if removed.is_some() {
            debug!(key = %self.key, "every waiter left, abandoning shared fetch");
        }
    }
}

/// A [`FetchCoordinator`] that shares one pending fetch per key
pub struct CoalescingCoordinator<V, E> {
    inner: FetchCoordinator<V>,
    in_flight: Arc<DashMap<String, Slot<V, E>>>,
}

impl<V, E> Clone for CoalescingCoordinator<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<V, E> fmt::Debug for CoalescingCoordinator<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingCoordinator")
            .field("inner", &self.inner)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<V, E> CoalescingCoordinator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new(inner: FetchCoordinator<V>) -> Self {
        Self {
            inner,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// The wrapped coordinator
    pub fn inner(&self) -> &FetchCoordinator<V> {
        &self.inner
    }

    /// Number of keys with a fetch currently pending
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Same contract as [`FetchCoordinator::get`], with at most one fetch per key
    ///
    /// The fetch future must be `'static` because it may outlive the caller
    /// that started it when other callers are still waiting on it.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> Result<FetchOutcome<V>, FetchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.get_with_ttl(key, self.inner.ttl(), fetch).await
    }

    pub async fn get_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<FetchOutcome<V>, FetchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();

        self.inner
            .resolve(key, ttl, move || async move {
                let pending = {
                    let mut slot = in_flight.entry(owned_key.clone()).or_insert_with(|| {
                        debug!(key = %owned_key, "starting shared fetch");
                        Slot {
                            fetch: fetch().map(|result| result.map_err(Arc::new)).boxed().shared(),
                            waiters: 0,
                        }
                    });
                    slot.waiters += 1;
                    slot.fetch.clone()
                };
                let guard = WaiterGuard {
                    in_flight,
                    key: owned_key,
                    fetch: pending.clone(),
                };

                let result = pending.await;
                guard.settled();
                result
            })
            .await
    }

    pub fn introspect(&self) -> Vec<EntryStatus> {
        self.inner.introspect()
    }
}
