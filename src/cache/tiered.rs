//! Two-level cache: in-process L1 over the shared L2, with cross-process invalidation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::client::CacheClient;
use super::error::{CacheError, CacheResult};
use super::l1::LocalCache;
use super::l2::{RedisStore, SharedCache, SharedStore};
#[cfg(any(test, feature = "mock"))]
use super::l2::{L2Config, MockSharedStore};
use super::subscription::{Subscription, UpdateCallback, update_callback};
use super::types::{Item, TierCounters, TierStats, TierStatus};
use crate::config::{LocalCacheConfig, SharedCacheConfig, TwoLevelConfig};

/// Read-through, write-through composition of [`LocalCache`] and [`SharedCache`].
///
/// Writes by this process are visible to it immediately. Other processes keep a stale L1
/// entry until their local TTL runs out or an invalidation for the key reaches them.
pub struct TwoLevelCache<S: SharedStore> {
    l1: LocalCache,
    l2: SharedCache<S>,
    counters: Arc<TierCounters>,
    config: TwoLevelConfig,
}

impl<S: SharedStore> Clone for TwoLevelCache<S> {
    fn clone(&self) -> Self {
        Self {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            counters: Arc::clone(&self.counters),
            config: self.config,
        }
    }
}

impl<S: SharedStore> std::fmt::Debug for TwoLevelCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoLevelCache")
            .field("l1", &self.l1)
            .field("l2", &self.l2)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<S: SharedStore> TwoLevelCache<S> {
    pub fn new(l1: LocalCache, l2: SharedCache<S>, config: TwoLevelConfig) -> Self {
        Self {
            l1,
            l2,
            counters: Arc::new(TierCounters::default()),
            config,
        }
    }

    pub fn l1(&self) -> &LocalCache {
        &self.l1
    }

    pub fn l2(&self) -> &SharedCache<S> {
        &self.l2
    }

    pub fn config(&self) -> &TwoLevelConfig {
        &self.config
    }

    pub fn stats(&self) -> TierStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Reads `key` and reports which tier answered.
    #[instrument(skip(self))]
    pub async fn lookup(&self, key: &str) -> CacheResult<(Vec<u8>, TierStatus)> {
        if let Some(value) = self.l1.lookup(key) {
            debug!("L1 cache hit");
            self.counters.record(TierStatus::HitLocal);
            return Ok((value.to_vec(), TierStatus::HitLocal));
        }

        debug!("L1 miss, checking L2 cache");

        let epoch = self.l1.epoch(key);
        match self.l2.get(key).await {
            Ok(value) => {
                let cached = self.l1.populate(key, value.as_slice(), epoch);
                self.counters.record(TierStatus::HitShared);
                debug!(bytes = value.len(), cached, "L2 cache hit");
                Ok((value, TierStatus::HitShared))
            }
            Err(e) if e.is_not_found() => {
                self.counters.record(TierStatus::Miss);
                debug!("L2 cache miss");
                Err(e)
            }
            Err(e) => {
                self.counters.record_l1_miss();
                Err(e)
            }
        }
    }

    /// Keeps this process's L1 entry for `key` coherent with other writers.
    pub async fn invalidate_on_update(
        &self,
        cancel: CancellationToken,
        key: &str,
    ) -> CacheResult<Subscription> {
        self.on_updated(cancel, key, update_callback(|| Ok(())))
            .await
    }

    async fn publish_write(&self, key: &str) {
        if !self.config.notify_on_write {
            return;
        }
        if let Err(e) = self.l2.notify_updated(key).await {
            warn!(key = %key, error = %e, "failed to publish invalidation");
        }
    }
}

impl TwoLevelCache<RedisStore> {
    /// Builds the production cache: moka L1 over a supervised Redis L2.
    pub async fn connect_redis(
        shared: SharedCacheConfig,
        local: LocalCacheConfig,
        config: TwoLevelConfig,
    ) -> CacheResult<Self> {
        local.validate()?;
        let l2 = SharedCache::connect_redis(shared).await?;
        Ok(Self::new(LocalCache::with_config(local), l2, config))
    }
}

impl<S: SharedStore> CacheClient for TwoLevelCache<S> {
    #[instrument(skip(self, item), fields(key = %item.key, delete = item.options.delete))]
    async fn set(&self, item: &Item) -> CacheResult<()> {
        if item.is_delete() {
            return self.delete(&item.key).await;
        }

        let value = item
            .value
            .as_deref()
            .ok_or_else(|| CacheError::validation("cannot set nil item in cache"))?;

        self.l2.set(item).await?;

        if item.options.disable_overwrite {
            // The shared tier may have kept an older value; read it back on demand.
            self.l1.invalidate(&item.key);
        } else {
            self.l1.write(&item.key, value, item.options.expiration);
        }

        self.publish_write(&item.key).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.lookup(key).await.map(|(value, _)| value)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.l2.delete(key).await?;
        self.l1.invalidate(key);
        self.publish_write(key).await;
        Ok(())
    }

    /// Evicts the L1 entry for `key` before running `callback` on every invalidation.
    async fn on_updated(
        &self,
        cancel: CancellationToken,
        key: &str,
        callback: UpdateCallback,
    ) -> CacheResult<Subscription> {
        let l1 = self.l1.clone();
        let evict_key = key.to_string();
        let evicting = update_callback(move || {
            l1.invalidate(&evict_key);
            callback()
        });
        self.l2.on_updated(cancel, key, evicting).await
    }

    async fn notify_updated(&self, key: &str) -> CacheResult<()> {
        self.l2.notify_updated(key).await
    }
}

#[cfg(any(test, feature = "mock"))]
pub type MockTwoLevelCache = TwoLevelCache<MockSharedStore>;

#[cfg(any(test, feature = "mock"))]
impl TwoLevelCache<MockSharedStore> {
    /// A standalone process over a fresh in-memory shared store.
    pub fn new_mock(l2_config: L2Config) -> CacheResult<Self> {
        Self::attach_mock(&MockSharedStore::new(), l2_config)
    }

    /// Another process attached to the same in-memory shared store.
    pub fn attach_mock(store: &MockSharedStore, l2_config: L2Config) -> CacheResult<Self> {
        let l2 = SharedCache::attach_mock(store, l2_config)?;
        Ok(Self::new(LocalCache::new(), l2, TwoLevelConfig::default()))
    }

    pub fn with_local_config(mut self, config: LocalCacheConfig) -> Self {
        self.l1 = LocalCache::with_config(config);
        self
    }

    pub fn with_config(mut self, config: TwoLevelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mock_store(&self) -> &MockSharedStore {
        self.l2.store()
    }
}
