pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod redis;

#[cfg(test)]
mod tests;

pub use backend::{NotificationStream, SharedStore};
pub use cache::SharedCache;
pub use config::L2Config;
pub use error::{StoreError, StoreResult};
#[cfg(any(test, feature = "mock"))]
pub use mock::{
    CallCounts, MockConnection, MockConnector, MockSharedCache, MockSharedStore,
    SupervisedMockStore,
};
pub use redis::{RedisConnection, RedisConnector, RedisSharedCache, RedisStore};
