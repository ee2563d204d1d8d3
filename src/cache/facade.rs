//! Application-facing cache: typed values, schema-versioned keys, input validation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::CacheClient;
use super::codec::{Codec, JsonCodec};
use super::error::{CacheError, CacheResult};
use super::subscription::{Subscription, UpdateCallback};
use super::types::{ActionOptions, Item};
use crate::constants::{DEFAULT_SCHEMA_VERSION, KEY_VERSION_SEPARATOR};

/// Wraps any [`CacheClient`] so callers work with logical keys and typed values.
///
/// Every logical key is suffixed with `|<schema version>` before it reaches the client,
/// for reads, writes and invalidations alike.
#[derive(Debug, Clone)]
pub struct Cache<C: CacheClient, K: Codec = JsonCodec> {
    client: C,
    codec: K,
    schema_version: String,
}

impl<C: CacheClient> Cache<C, JsonCodec> {
    pub fn new(client: C) -> Self {
        Self::with_codec(client, JsonCodec)
    }
}

impl<C: CacheClient, K: Codec> Cache<C, K> {
    pub fn with_codec(client: C, codec: K) -> Self {
        Self {
            client,
            codec,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// The wrapped client (e.g. for tier statistics).
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn full_key(&self, key: &str) -> String {
        if key.is_empty() {
            debug!("cache key is empty; every empty key maps to the same entry");
        }
        format!("{key}{KEY_VERSION_SEPARATOR}{}", self.schema_version)
    }

    /// Stores `value` under `key`, or deletes the key when `options.delete` is set.
    ///
    /// A `None` value on a non-delete write is rejected before any I/O.
    pub async fn set_item<T>(
        &self,
        key: &str,
        value: Option<&T>,
        options: ActionOptions,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let full_key = self.full_key(key);
        if options.delete {
            return self.client.delete(&full_key).await;
        }

        let value = value.ok_or_else(|| CacheError::validation("cannot set nil value in cache"))?;
        let bytes = self.codec.encode(value)?;
        self.client
            .set(&Item::new(full_key, bytes).with_options(options))
            .await
    }

    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let bytes = self.client.get(&self.full_key(key)).await?;
        self.codec.decode(&bytes)
    }

    /// Reads `key` into `destination`. A `None` destination is rejected before any I/O.
    pub async fn get_item_into<T: DeserializeOwned>(
        &self,
        key: &str,
        destination: Option<&mut T>,
    ) -> CacheResult<()> {
        let destination = destination
            .ok_or_else(|| CacheError::validation("cannot get item into nil destination"))?;
        *destination = self.get_item(key).await?;
        Ok(())
    }

    pub async fn delete_item(&self, key: &str) -> CacheResult<()> {
        self.client.delete(&self.full_key(key)).await
    }

    pub async fn on_updated(
        &self,
        cancel: CancellationToken,
        key: &str,
        callback: UpdateCallback,
    ) -> CacheResult<Subscription> {
        self.client
            .on_updated(cancel, &self.full_key(key), callback)
            .await
    }

    pub async fn notify_updated(&self, key: &str) -> CacheResult<()> {
        self.client.notify_updated(&self.full_key(key)).await
    }
}
