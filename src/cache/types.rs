use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-call options attached to a write.
///
/// The set is open: unknown knobs travel in [`ActionOptions::extra`] so adapters can
/// pick up new overrides without a schema change here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ActionOptions {
    /// The write is a deletion; any value is ignored.
    pub delete: bool,
    /// Shared-tier expiration override. `Some(Duration::ZERO)` means "never expire".
    pub expiration: Option<Duration>,
    /// Only store if the key is currently absent.
    pub disable_overwrite: bool,
    pub extra: BTreeMap<String, String>,
}

impl ActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a delete-through-set call.
    pub fn deletion() -> Self {
        Self {
            delete: true,
            ..Default::default()
        }
    }

    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    pub fn disable_overwrite(mut self, disable: bool) -> Self {
        self.disable_overwrite = disable;
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

/// The unit of storage handed to a [`crate::cache::CacheClient`].
///
/// `value` is the encoded payload. `None` is only legal when `options.delete` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub options: ActionOptions,
}

impl Item {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            options: ActionOptions::default(),
        }
    }

    pub fn deletion(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            options: ActionOptions::deletion(),
        }
    }

    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn is_delete(&self) -> bool {
        self.options.delete
    }
}

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierStatus {
    HitLocal,
    HitShared,
    Miss,
}

impl TierStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TierStatus::HitLocal => "HIT_L1",
            TierStatus::HitShared => "HIT_L2",
            TierStatus::Miss => "MISS",
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        !matches!(self, TierStatus::Miss)
    }
}

impl std::fmt::Display for TierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hit/miss counters per tier. Cheap to update from any task.
#[derive(Debug, Default)]
pub struct TierCounters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
}

impl TierCounters {
    pub fn record(&self, status: TierStatus) {
        // Relaxed: counters are independent and only read for reporting.
        match status {
            TierStatus::HitLocal => {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
            }
            TierStatus::HitShared => {
                self.l1_misses.fetch_add(1, Ordering::Relaxed);
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
            }
            TierStatus::Miss => {
                self.l1_misses.fetch_add(1, Ordering::Relaxed);
                self.l2_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records an L1 miss whose L2 lookup failed with a non-`NotFound` error.
    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStats {
        TierStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.l1_hits.store(0, Ordering::Relaxed);
        self.l1_misses.store(0, Ordering::Relaxed);
        self.l2_hits.store(0, Ordering::Relaxed);
        self.l2_misses.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`TierCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
}

impl TierStats {
    /// Number of reads that reached the shared tier.
    pub fn l2_lookups(&self) -> u64 {
        self.l2_hits + self.l2_misses
    }
}
