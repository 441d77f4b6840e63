//! Outbound worker pool sizing
//!
//! The worker count grows by one per hundred followers on top of a base
//! and is capped, so a large audience cannot scale delivery fan-out
//! without bound.

use std::future::Future;

use crate::error::AppError;

/// Workers for an account with no followers
pub const MIN_WORKERS: usize = 10;
/// Hard cap regardless of audience size
pub const MAX_WORKERS: usize = 50;
/// Used when the follower count cannot be read
pub const DEFAULT_WORKERS: usize = 20;

const FOLLOWERS_PER_WORKER: u64 = 100;

/// Source of the local follower count.
pub trait FollowerCount {
    fn follower_count(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Worker count for a given number of followers.
pub fn workers_for_followers(follower_count: u64) -> usize {
    let extra = usize::try_from(follower_count / FOLLOWERS_PER_WORKER).unwrap_or(usize::MAX);
    MIN_WORKERS.saturating_add(extra).min(MAX_WORKERS)
}

/// Decide the outbound pool size from the current follower count.
///
/// A failed lookup is logged and falls back to `DEFAULT_WORKERS`.
pub async fn outbound_pool_size<S: FollowerCount>(source: &S) -> usize {
    let follower_count = match source.follower_count().await {
        Ok(count) => count,
        Err(error) => {
            tracing::error!(%error, "Unable to get follower count");
            return DEFAULT_WORKERS;
        }
    };

    let workers = workers_for_followers(follower_count);
    tracing::info!(
        workers,
        followers = follower_count,
        "Initializing outbound worker pool with {} workers for {} followers",
        workers,
        follower_count
    );
    workers
}
