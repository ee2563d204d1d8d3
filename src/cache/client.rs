use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::error::CacheResult;
use super::subscription::{Subscription, UpdateCallback};
use super::types::Item;

/// The cache capability every tier implements identically.
///
/// Keys reaching this trait are already fully derived (see [`crate::cache::Cache`]).
pub trait CacheClient: Send + Sync {
    /// Writes `item`, or deletes it when `item.options.delete` is set.
    ///
    /// A non-delete item without a value is rejected with `Validation`.
    fn set(&self, item: &Item) -> impl Future<Output = CacheResult<()>> + Send;

    /// Returns the stored payload, or `NotFound`.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Vec<u8>>> + Send;

    /// Removes `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<()>> + Send;

    /// Runs `callback` whenever an invalidation for `key` is observed, from any process.
    ///
    /// Torn down by [`Subscription::cancel`], by dropping the handle, or by `cancel`.
    fn on_updated(
        &self,
        cancel: CancellationToken,
        key: &str,
        callback: UpdateCallback,
    ) -> impl Future<Output = CacheResult<Subscription>> + Send;

    /// Broadcasts an invalidation for `key`. Fire-and-forget, at most once.
    fn notify_updated(&self, key: &str) -> impl Future<Output = CacheResult<()>> + Send;
}
