//! Cache tiers: L1 local, L2 shared, their two-level composition and the facade.

pub mod client;
pub mod codec;
pub mod compression;
pub mod error;
pub mod facade;
pub mod l1;
pub mod l2;
pub mod subscription;
pub mod supervisor;
pub mod tiered;
pub mod types;


pub use client::CacheClient;
pub use codec::{Codec, JsonCodec};
pub use compression::CompressionMode;
pub use error::{CacheError, CacheResult};
pub use facade::Cache;
pub use l1::LocalCache;
pub use l2::{
    L2Config, NotificationStream, RedisConnection, RedisConnector, RedisSharedCache, RedisStore,
    SharedCache, SharedStore, StoreError, StoreResult,
};
#[cfg(any(test, feature = "mock"))]
pub use l2::{
    CallCounts, MockConnection, MockConnector, MockSharedCache, MockSharedStore,
    SupervisedMockStore,
};
pub use subscription::{EventSink, Subscription, SubscriptionError, UpdateCallback, update_callback};
pub use supervisor::{ConnectionSupervisor, Connector, Lease};
#[cfg(any(test, feature = "mock"))]
pub use tiered::MockTwoLevelCache;
pub use tiered::TwoLevelCache;
pub use types::{ActionOptions, Item, TierCounters, TierStats, TierStatus};
