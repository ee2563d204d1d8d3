use std::time::Duration;

use crate::cache::compression::CompressionMode;
use crate::config::SharedCacheConfig;
use crate::constants::{
    DEFAULT_CACHE_EXPIRATION, DEFAULT_REDIS_RETRY_COUNT, RESUBSCRIBE_BASE_BACKOFF,
    RESUBSCRIBE_MAX_BACKOFF, RETRY_BASE_BACKOFF, RETRY_MAX_BACKOFF,
};

use crate::cache::error::{CacheError, CacheResult};

/// Encoding and retry behaviour of the shared-cache adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2Config {
    pub compression: CompressionMode,
    /// Applied when an item has no expiration override. Zero disables expiry.
    pub default_expiration: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub resubscribe_base_backoff: Duration,
    pub resubscribe_max_backoff: Duration,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            compression: CompressionMode::GZip,
            default_expiration: DEFAULT_CACHE_EXPIRATION,
            max_retries: DEFAULT_REDIS_RETRY_COUNT,
            retry_base_backoff: RETRY_BASE_BACKOFF,
            retry_max_backoff: RETRY_MAX_BACKOFF,
            resubscribe_base_backoff: RESUBSCRIBE_BASE_BACKOFF,
            resubscribe_max_backoff: RESUBSCRIBE_MAX_BACKOFF,
        }
    }
}

impl L2Config {
    pub fn from_shared(config: &SharedCacheConfig) -> Self {
        Self {
            compression: config.compression,
            default_expiration: config.default_expiration,
            max_retries: config.max_retries,
            ..Default::default()
        }
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    pub fn default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration = ttl;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets both retry backoff bounds (mostly for tests).
    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_backoff = base;
        self.retry_max_backoff = max;
        self
    }

    pub fn resubscribe_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.resubscribe_base_backoff = base;
        self.resubscribe_max_backoff = max;
        self
    }

    /// Expiration for an item: its override if present, else the default. `None` = no expiry.
    pub fn effective_ttl(&self, item_override: Option<Duration>) -> Option<Duration> {
        let ttl = item_override.unwrap_or(self.default_expiration);
        (!ttl.is_zero()).then_some(ttl)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.retry_base_backoff > self.retry_max_backoff {
            return Err(CacheError::configuration(format!(
                "retry_base_backoff ({:?}) cannot exceed retry_max_backoff ({:?})",
                self.retry_base_backoff, self.retry_max_backoff
            )));
        }
        if self.resubscribe_base_backoff.is_zero() {
            return Err(CacheError::configuration(
                "resubscribe_base_backoff must be > 0",
            ));
        }
        if self.resubscribe_base_backoff > self.resubscribe_max_backoff {
            return Err(CacheError::configuration(format!(
                "resubscribe_base_backoff ({:?}) cannot exceed resubscribe_max_backoff ({:?})",
                self.resubscribe_base_backoff, self.resubscribe_max_backoff
            )));
        }
        Ok(())
    }
}
