//! L1 per-process cache (in-memory).
//!
//! Entries are the decoded (decompressed) payload bytes keyed by the full key. Size and
//! lifetime are bounded by [`LocalCacheConfig`]; nothing here is shared across processes.
//!
//! Every key also carries an invalidation epoch. Writers and evictions bump it, so a read
//! that fetched from the shared tier before an invalidation cannot repopulate the entry
//! afterwards (see [`LocalCache::populate`]).

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::CacheClient;
use super::error::{CacheError, CacheResult};
use super::subscription::{Subscription, UpdateCallback};
use super::types::Item;
use crate::config::LocalCacheConfig;

const NOTIFICATION_CAPACITY: usize = 256;
const EPOCH_STRIPES: usize = 64;

#[derive(Clone)]
struct LocalEntry {
    bytes: Arc<[u8]>,
    expiration: Option<Duration>,
}

/// Local TTL, shortened by a per-item expiration. Zero means "no override".
struct LocalExpiry {
    ttl: Duration,
}

impl LocalExpiry {
    fn lifetime(&self, entry: &LocalEntry) -> Duration {
        match entry.expiration {
            Some(expiration) if !expiration.is_zero() => expiration.min(self.ttl),
            _ => self.ttl,
        }
    }
}

impl Expiry<String, LocalEntry> for LocalExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }
}

/// Striped per-key invalidation counters. Keys sharing a stripe share an epoch.
struct Epochs {
    stripes: Box<[AtomicU64]>,
}

impl Epochs {
    fn new() -> Self {
        Self {
            stripes: (0..EPOCH_STRIPES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn stripe(&self, key: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn current(&self, key: &str) -> u64 {
        self.stripe(key).load(Ordering::SeqCst)
    }

    fn bump(&self, key: &str) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }
}

/// Bounded in-memory cache keyed by full key.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct LocalCache {
    entries: Cache<String, LocalEntry>,
    epochs: Arc<Epochs>,
    config: LocalCacheConfig,
    notifications: broadcast::Sender<Arc<str>>,
}

impl LocalCache {
    /// Creates a cache with the default capacity and TTL.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(LocalCacheConfig::default())
    }

    /// Creates a cache with max entry capacity and per-entry time-to-live.
    pub fn with_config(config: LocalCacheConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            entries: Cache::builder()
                .max_capacity(config.capacity)
                .expire_after(LocalExpiry { ttl: config.ttl })
                .build(),
            epochs: Arc::new(Epochs::new()),
            config,
            notifications,
        }
    }

    pub fn config(&self) -> &LocalCacheConfig {
        &self.config
    }

    #[inline]
    pub fn lookup(&self, key: &str) -> Option<Arc<[u8]>> {
        self.entries.get(key).map(|entry| entry.bytes)
    }

    /// Inserts with the local TTL.
    #[inline]
    pub fn insert(&self, key: &str, value: impl Into<Arc<[u8]>>) {
        self.insert_expiring(key, value, None);
    }

    /// Inserts with `min(local ttl, expiration)`; `None` or zero keeps the local TTL.
    pub fn insert_expiring(
        &self,
        key: &str,
        value: impl Into<Arc<[u8]>>,
        expiration: Option<Duration>,
    ) {
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                bytes: value.into(),
                expiration,
            },
        );
    }

    #[inline]
    pub fn remove(&self, key: &str) -> Option<Arc<[u8]>> {
        self.entries.remove(key).map(|entry| entry.bytes)
    }

    /// Current invalidation epoch of `key`. Read it before fetching from the shared tier.
    #[inline]
    pub fn epoch(&self, key: &str) -> u64 {
        self.epochs.current(key)
    }

    /// Stores a value written by this process, superseding any in-flight [`populate`].
    ///
    /// [`populate`]: LocalCache::populate
    pub fn write(&self, key: &str, value: impl Into<Arc<[u8]>>, expiration: Option<Duration>) {
        self.epochs.bump(key);
        self.insert_expiring(key, value, expiration);
    }

    /// Drops `key` and supersedes any in-flight [`populate`].
    ///
    /// [`populate`]: LocalCache::populate
    pub fn invalidate(&self, key: &str) {
        self.epochs.bump(key);
        self.entries.invalidate(key);
    }

    /// Caches a value fetched from the shared tier, unless `key` was written or invalidated
    /// since `epoch` was read. Returns whether the entry was kept.
    pub fn populate(&self, key: &str, value: impl Into<Arc<[u8]>>, epoch: u64) -> bool {
        if self.epochs.current(key) != epoch {
            return false;
        }
        self.insert(key, value);
        // An invalidation may have landed between the check and the insert.
        if self.epochs.current(key) != epoch {
            self.entries.invalidate(key);
            return false;
        }
        true
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of cached entries (approximate until pending tasks run).
    #[inline]
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.entry_count() == 0
    }

    #[inline]
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Runs any pending maintenance tasks in the underlying cache.
    #[inline]
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|(k, _)| (*k).clone())
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.entries.entry_count())
            .field("capacity", &self.config.capacity)
            .field("ttl", &self.config.ttl)
            .finish()
    }
}

/// Single-process mode: the local tier alone satisfies the cache contract, and
/// invalidations travel over an in-process bus.
impl CacheClient for LocalCache {
    async fn set(&self, item: &Item) -> CacheResult<()> {
        if item.is_delete() {
            self.invalidate(&item.key);
            return Ok(());
        }
        let value = item
            .value
            .as_deref()
            .ok_or_else(|| CacheError::validation("cannot set nil item in cache"))?;
        self.write(&item.key, value, item.options.expiration);
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.lookup(key)
            .map(|v| v.to_vec())
            .ok_or_else(|| CacheError::not_found(key))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.invalidate(key);
        Ok(())
    }

    async fn on_updated(
        &self,
        cancel: CancellationToken,
        key: &str,
        callback: UpdateCallback,
    ) -> CacheResult<Subscription> {
        let mut rx = self.notifications.subscribe();
        let wanted: Arc<str> = Arc::from(key);
        Ok(Subscription::spawn(
            key,
            &cancel,
            callback,
            move |sink, _token| async move {
                loop {
                    match rx.recv().await {
                        Ok(k) if k == wanted => {
                            if !sink.deliver() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "local notification bus lagged");
                            if !sink.deliver() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            },
        ))
    }

    async fn notify_updated(&self, key: &str) -> CacheResult<()> {
        // No receivers is fine: nobody is subscribed.
        let _ = self.notifications.send(Arc::from(key));
        Ok(())
    }
}
