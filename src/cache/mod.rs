//! Read-through caching for slow or unreliable upstreams
//!
//! This module provides an in-memory [`CacheStore`] and a [`FetchCoordinator`]
//! that serves fresh entries directly, refreshes expired ones, and degrades to
//! the expired entry when a refresh fails. Callers build keys as
//! `"<kind>:<normalized param>"`; the cache does not validate them.

mod clock;
mod coalesce;
pub mod compose;
mod coordinator;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::CoalescingCoordinator;
pub use compose::{then_fetch, Dependent};
pub use coordinator::{EntryStatus, FetchCoordinator, FetchError, FetchOutcome, Origin};
pub use store::{CacheEntry, CacheStore};
