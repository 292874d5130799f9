//! Fetch, seed once when the cache cannot vouch for the result, re-fetch.
//!
//! The second fetch is final: a result that still looks incomplete after a
//! seed means the source of truth holds nothing more.

use std::future::Future;

use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ReadThrough<T> {
    pub value: T,
    /// Whether a seed ran between the two fetches.
    pub seeded: bool,
}

/// `plan` inspects the first result and returns what the seeder needs, or
/// `None` when the result can be served as is.
pub async fn read_through<T, P, E, Fetch, FetchFut, Plan, Seed, SeedFut>(
    fetch: Fetch,
    plan: Plan,
    seed: Seed,
) -> Result<ReadThrough<T>, E>
where
    Fetch: Fn() -> FetchFut,
    FetchFut: Future<Output = Result<T, E>>,
    Plan: FnOnce(&T) -> Option<P>,
    Seed: FnOnce(P) -> SeedFut,
    SeedFut: Future<Output = Result<usize, E>>,
{
    let first = fetch().await?;
    let Some(plan) = plan(&first) else {
        return Ok(ReadThrough {
            value: first,
            seeded: false,
        });
    };

    let rows = seed(plan).await?;
    debug!(
        target: "reseed::application::read_through",
        rows,
        "Seeded after an incomplete fetch; re-fetching once"
    );
    let value = fetch().await?;
    Ok(ReadThrough {
        value,
        seeded: true,
    })
}
