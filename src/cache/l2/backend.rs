use std::future::Future;
use std::time::Duration;

use futures_util::stream::BoxStream;

use super::error::StoreResult;

/// Stream of invalidation events for one channel. Ends when the pub/sub link drops.
pub type NotificationStream = BoxStream<'static, ()>;

/// Raw byte transport to the shared cache service.
///
/// Implementations do no encoding, retrying or TTL defaulting; [`super::SharedCache`]
/// layers those on top.
pub trait SharedStore: Send + Sync + 'static {
    /// Returns `None` when the key is absent.
    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<Vec<u8>>>> + Send;

    /// Stores `value`. `ttl` of `None` means no expiry. With `only_if_absent`, an existing
    /// key is left untouched.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Removes `key`; absent keys are not an error.
    fn delete(&self, key: &str) -> impl Future<Output = StoreResult<()>> + Send;

    fn publish(&self, channel: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Subscribes to `channel`. The subscription is active when this resolves.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = StoreResult<NotificationStream>> + Send;
}
