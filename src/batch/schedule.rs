//! Warm-up ordering: cheapest items first.

use crate::Result;
use std::path::Path;

/// Sort key for items whose cost cannot be determined; they run last.
pub const UNKNOWN_COST: u64 = u64::MAX;

/// Resolve an item's cost, falling back to [`UNKNOWN_COST`].
pub fn resolve_cost<I, F>(item: &I, cost: &F) -> u64
where
    I: std::fmt::Display,
    F: Fn(&I) -> Result<u64> + ?Sized,
{
    match cost(item) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(item = %item, error = %e, "unable to determine cost, scheduling last");
            UNKNOWN_COST
        }
    }
}

/// Stable ascending sort by cost. Ties keep the caller's order.
pub fn order_by_cost<I, F>(items: Vec<I>, cost: &F) -> Vec<I>
where
    I: std::fmt::Display,
    F: Fn(&I) -> Result<u64> + ?Sized,
{
    let mut keyed: Vec<(u64, I)> = items
        .into_iter()
        .map(|item| (resolve_cost(&item, cost), item))
        .collect();
    keyed.sort_by_key(|(c, _)| *c);
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// On-disk size in bytes.
pub fn file_size_cost(path: impl AsRef<Path>) -> Result<u64> {
    Ok(std::fs::metadata(path.as_ref())?.len())
}
