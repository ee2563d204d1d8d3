use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::client::CacheClient;
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::subscription::{Subscription, UpdateCallback};
use crate::cache::types::Item;
use crate::constants::backoff_for_attempt;

use super::backend::SharedStore;
use super::config::L2Config;
use super::error::StoreResult;

/// Shared-tier (L2) adapter: compression, expiration and retries over a [`SharedStore`].
pub struct SharedCache<S: SharedStore> {
    store: Arc<S>,
    config: L2Config,
}

impl<S: SharedStore> Clone for SharedCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: SharedStore> std::fmt::Debug for SharedCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: SharedStore> SharedCache<S> {
    pub fn new(store: S, config: L2Config) -> CacheResult<Self> {
        Self::from_arc(Arc::new(store), config)
    }

    /// Builds an adapter over a store that may be shared with other adapters.
    pub fn from_arc(store: Arc<S>, config: L2Config) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &L2Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `op` until it succeeds or the retry budget is spent.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> CacheResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    warn!(op, key = %key, error = %e, "shared cache rejected command");
                    return Err(CacheError::serialization(e));
                }
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(op, key = %key, attempts = attempt + 1, error = %e, "shared cache retries exhausted");
                    return Err(CacheError::Connection {
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = backoff_for_attempt(
                        self.config.retry_base_backoff,
                        self.config.retry_max_backoff,
                        attempt,
                    );
                    debug!(op, key = %key, attempt, error = %e, ?delay, "shared cache operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl<S: SharedStore> CacheClient for SharedCache<S> {
    #[instrument(skip(self, item), fields(key = %item.key, delete = item.options.delete))]
    async fn set(&self, item: &Item) -> CacheResult<()> {
        if item.is_delete() {
            return self.delete(&item.key).await;
        }

        let value = item
            .value
            .as_deref()
            .ok_or_else(|| CacheError::validation("cannot set nil item in cache"))?;
        let encoded = self.config.compression.encode(value)?;
        let ttl = self.config.effective_ttl(item.options.expiration);
        let only_if_absent = item.options.disable_overwrite;

        self.with_retry("set", &item.key, || {
            self.store
                .set(&item.key, encoded.clone(), ttl, only_if_absent)
        })
        .await?;

        debug!(bytes = encoded.len(), ?ttl, "stored in shared cache");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let stored = self
            .with_retry("get", key, || self.store.get(key))
            .await?
            .ok_or_else(|| CacheError::not_found(key))?;

        self.config.compression.decode(&stored)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.with_retry("delete", key, || self.store.delete(key))
            .await
    }

    #[instrument(skip(self, cancel, callback))]
    async fn on_updated(
        &self,
        cancel: CancellationToken,
        key: &str,
        callback: UpdateCallback,
    ) -> CacheResult<Subscription> {
        let initial = self
            .with_retry("subscribe", key, || self.store.subscribe(key))
            .await?;

        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let channel = key.to_string();

        Ok(Subscription::spawn(
            key,
            &cancel,
            callback,
            move |sink, token| async move {
                let mut stream = Some(initial);
                let mut attempt = 0u32;
                loop {
                    if let Some(mut events) = stream.take() {
                        attempt = 0;
                        while events.next().await.is_some() {
                            if !sink.deliver() {
                                return;
                            }
                        }
                        warn!(channel = %channel, "invalidation subscription dropped, resubscribing");
                    }

                    let delay = backoff_for_attempt(
                        config.resubscribe_base_backoff,
                        config.resubscribe_max_backoff,
                        attempt,
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    match store.subscribe(&channel).await {
                        Ok(events) => {
                            info!(channel = %channel, "invalidation subscription restored");
                            // Anything published while disconnected was lost.
                            if !sink.deliver() {
                                return;
                            }
                            stream = Some(events);
                        }
                        Err(e) => {
                            warn!(channel = %channel, error = %e, attempt, "resubscribe failed");
                        }
                    }
                }
            },
        ))
    }

    #[instrument(skip(self))]
    async fn notify_updated(&self, key: &str) -> CacheResult<()> {
        // At most once: no retry, no acknowledgement.
        self.store
            .publish(key)
            .await
            .map_err(|e| CacheError::Connection {
                attempts: 1,
                reason: e.to_string(),
            })
    }
}
