//! Coherent two-level cache library (used by the probe binary and integration tests).
//!
//! # Public API Surface
//!
//! ## Application entry point
//! - [`Cache`] - typed values under schema-versioned keys, over any [`CacheClient`]
//!
//! ## Tiers
//! - [`LocalCache`] - per-process, bounded L1
//! - [`SharedCache`] - L2 adapter (compression, expiration, retries) over a [`SharedStore`]
//! - [`RedisStore`] - Redis transport, single endpoint or sentinel failover
//! - [`TwoLevelCache`] - read-through/write-through composition with invalidation
//!
//! ## Resilience
//! - [`ConnectionSupervisor`], [`Connector`] - generation-stamped connection rebuilds
//! - [`Subscription`] - explicit handle for `on_updated` registrations
//!
//! ## Configuration
//! - [`SharedCacheConfig`], [`LocalCacheConfig`], [`TwoLevelConfig`]
//!
//! ## Test/Mock Support
//! In-memory stores are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod cache;
pub mod config;
pub mod constants;

pub use cache::{
    ActionOptions, Cache, CacheClient, CacheError, CacheResult, Codec, CompressionMode,
    ConnectionSupervisor, Connector, EventSink, Item, JsonCodec, L2Config, Lease, LocalCache,
    NotificationStream, RedisConnection, RedisConnector, RedisSharedCache, RedisStore,
    SharedCache, SharedStore, StoreError, StoreResult, Subscription, SubscriptionError,
    TierCounters, TierStats, TierStatus, TwoLevelCache, UpdateCallback, update_callback,
};
#[cfg(any(test, feature = "mock"))]
pub use cache::{
    CallCounts, MockConnection, MockConnector, MockSharedCache, MockSharedStore,
    MockTwoLevelCache, SupervisedMockStore,
};

pub use config::{
    ConfigError, LocalCacheConfig, SharedCacheConfig, TlsSettings, Topology, TwoLevelConfig,
};
pub use constants::{DEFAULT_SCHEMA_VERSION, KEY_VERSION_SEPARATOR};
