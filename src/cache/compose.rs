//! Dependent fetches
//!
//! A secondary lookup whose key comes out of a primary lookup's payload, such
//! as air quality fetched by the coordinates a weather lookup returned.

use std::future::Future;

use super::coordinator::{FetchError, FetchOutcome};

/// Both halves of a dependent fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Dependent<A, B> {
    pub primary: FetchOutcome<A>,
    pub secondary: FetchOutcome<B>,
}

/// Runs `primary`, then feeds its payload to `secondary`
///
/// If `primary` fails, `secondary` is never called and the primary error is
/// returned as is. Any primary origin, stale included, is good enough to
/// derive the secondary parameters from. `secondary` receives a borrow of the
/// payload and must copy out whatever it needs.
pub async fn then_fetch<A, B, E, P, S, SFut>(
    primary: P,
    secondary: S,
) -> Result<Dependent<A, B>, FetchError<E>>
where
    P: Future<Output = Result<FetchOutcome<A>, FetchError<E>>>,
    S: FnOnce(&A) -> SFut,
    SFut: Future<Output = Result<FetchOutcome<B>, FetchError<E>>>,
{
    let primary = primary.await?;
    let secondary = secondary(&primary.value).await?;
    Ok(Dependent { primary, secondary })
}
