//! Redis transport: connector (single endpoint or sentinel failover) and supervised store.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{
    Client, ClientTlsConfig, ConnectionInfo, ErrorKind, IntoConnectionInfo, RedisConnectionInfo,
    RedisError, RedisResult, TlsCertificates, TlsMode,
};
use tracing::{debug, instrument};

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::supervisor::{ConnectionSupervisor, Connector};
use crate::config::{SharedCacheConfig, Topology};

use super::backend::{NotificationStream, SharedStore};
use super::cache::SharedCache;
use super::config::L2Config;
use super::error::{StoreError, StoreResult};

/// Returns `true` when the connection that produced `err` should be replaced.
///
/// `READONLY` means we are talking to a replica: the primary moved after a failover.
pub fn is_fatal(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.kind() == ErrorKind::ReadOnly
}

/// Returns `true` when the server answered but refused the command itself.
pub fn is_rejection(err: &RedisError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TypeError | ErrorKind::ResponseError | ErrorKind::ExtensionError
    )
}

fn classify(err: RedisError) -> StoreError {
    if is_fatal(&err) {
        StoreError::Fatal(err.to_string())
    } else if is_rejection(&err) {
        StoreError::Rejected(err.to_string())
    } else {
        StoreError::Transient(err.to_string())
    }
}

fn response_timed_out(limit: Duration) -> RedisError {
    RedisError::from(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("no response within {limit:?}"),
    ))
}

/// A resolved client plus its multiplexed command connection.
#[derive(Clone)]
pub struct RedisConnection {
    client: Client,
    commands: MultiplexedConnection,
}

/// Rebuilds Redis connections from the parameters captured at construction.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: SharedCacheConfig,
}

impl RedisConnector {
    /// Validates and captures `config`. Invalid topology or TLS material fails here.
    pub fn new(config: SharedCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SharedCacheConfig {
        &self.config
    }

    fn scheme(&self) -> &'static str {
        if self.config.use_tls() {
            "rediss"
        } else {
            "redis"
        }
    }

    fn insecure(&self) -> bool {
        self.config
            .tls
            .as_ref()
            .is_some_and(|tls| tls.insecure_skip_verify)
    }

    fn connection_info(&self, address: &str, db: i64, with_auth: bool) -> CacheResult<ConnectionInfo> {
        let fragment = if self.insecure() { "#insecure" } else { "" };
        let url = format!("{}://{}/{}{}", self.scheme(), address, db, fragment);
        let mut info = url
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::configuration(format!("invalid endpoint {address}: {e}")))?;
        if with_auth {
            info.redis.username = self.config.username.clone();
            info.redis.password = self.config.password.clone();
        }
        Ok(info)
    }

    fn tls_certificates(&self) -> Option<TlsCertificates> {
        let tls = self.config.tls.as_ref()?;
        let client_tls = match (&tls.client_cert, &tls.client_key) {
            (Some(cert), Some(key)) => Some(ClientTlsConfig {
                client_cert: cert.clone(),
                client_key: key.clone(),
            }),
            _ => None,
        };
        let root_cert = if tls.insecure_skip_verify {
            None
        } else {
            tls.ca_cert.clone()
        };
        if client_tls.is_none() && root_cert.is_none() {
            return None;
        }
        Some(TlsCertificates {
            client_tls,
            root_cert,
        })
    }

    fn open_client(&self, info: ConnectionInfo) -> CacheResult<Client> {
        let client = match self.tls_certificates() {
            Some(certs) => Client::build_with_tls(info, certs),
            None => Client::open(info),
        };
        client.map_err(|e| CacheError::configuration(format!("invalid transport security material: {e}")))
    }

    async fn resolve_client(&self) -> CacheResult<Client> {
        match self.config.topology() {
            Topology::Single { address } => {
                self.open_client(self.connection_info(&address, self.config.db, true)?)
            }
            Topology::Failover {
                master_name,
                sentinel_addresses,
            } => {
                let sentinels = sentinel_addresses
                    .iter()
                    .map(|addr| self.connection_info(addr, 0, false))
                    .collect::<CacheResult<Vec<_>>>()?;
                let mut sentinel = Sentinel::build(sentinels)
                    .map_err(|e| CacheError::configuration(format!("invalid sentinel set: {e}")))?;

                let node_info = SentinelNodeConnectionInfo {
                    tls_mode: self.config.use_tls().then(|| {
                        if self.insecure() {
                            TlsMode::Insecure
                        } else {
                            TlsMode::Secure
                        }
                    }),
                    redis_connection_info: Some(RedisConnectionInfo {
                        db: self.config.db,
                        username: self.config.username.clone(),
                        password: self.config.password.clone(),
                        ..Default::default()
                    }),
                };

                let client = sentinel
                    .async_master_for(&master_name, Some(&node_info))
                    .await
                    .map_err(|e| CacheError::Connection {
                        attempts: 1,
                        reason: format!("sentinel could not resolve primary '{master_name}': {e}"),
                    })?;
                debug!(master = %master_name, "sentinel resolved primary");
                Ok(client)
            }
        }
    }
}

impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> CacheResult<RedisConnection> {
        let client = self.resolve_client().await?;
        let commands = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection {
                attempts: 1,
                reason: e.to_string(),
            })?;
        Ok(RedisConnection { client, commands })
    }

    fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout
    }

    fn describe(&self) -> String {
        match self.config.topology() {
            Topology::Single { address } => format!("{}://{}/{}", self.scheme(), address, self.config.db),
            Topology::Failover {
                master_name,
                sentinel_addresses,
            } => format!(
                "sentinel[{}]/{}/{}",
                sentinel_addresses.join(","),
                master_name,
                self.config.db
            ),
        }
    }
}

/// Redis-backed [`SharedStore`]. Every call's outcome is fed to the supervisor.
#[derive(Debug)]
pub struct RedisStore {
    supervisor: ConnectionSupervisor<RedisConnector>,
}

impl RedisStore {
    /// Validates `config` and opens the first connection.
    pub async fn connect(config: SharedCacheConfig) -> CacheResult<Self> {
        let connector = RedisConnector::new(config)?;
        Ok(Self {
            supervisor: ConnectionSupervisor::connect(connector).await?,
        })
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<RedisConnector> {
        &self.supervisor
    }

    async fn run<T, F, Fut>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(RedisConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let lease = self.supervisor.current();
        let limit = self.supervisor.connector().config.response_timeout;
        let outcome = tokio::time::timeout(limit, f(lease.connection().clone()))
            .await
            .unwrap_or_else(|_| Err(response_timed_out(limit)));
        self.supervisor
            .observe(lease.generation(), outcome, is_fatal)
            .await
            .map_err(classify)
    }
}

impl SharedStore for RedisStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run(|mut conn| async move {
            let value: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn.commands)
                .await?;
            Ok::<_, RedisError>(value)
        })
        .await
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> StoreResult<()> {
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
            if only_if_absent {
                cmd.arg("NX");
            }
            // NX answers nil when the key exists; both replies are success.
            let _: redis::Value = cmd.query_async(&mut conn.commands).await?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.run(|mut conn| async move {
            let _: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn.commands)
                .await?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn publish(&self, channel: &str) -> StoreResult<()> {
        self.run(|mut conn| async move {
            let _: i64 = redis::cmd("PUBLISH")
                .arg(channel)
                .arg(channel)
                .query_async(&mut conn.commands)
                .await?;
            Ok::<_, RedisError>(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        self.run(|conn| async move {
            let mut pubsub = conn.client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            let events: NotificationStream = pubsub.into_on_message().map(|_| ()).boxed();
            Ok::<_, RedisError>(events)
        })
        .await
    }
}

/// Type alias for the production L2 adapter.
pub type RedisSharedCache = SharedCache<RedisStore>;

impl SharedCache<RedisStore> {
    /// Connects to Redis with `config` and wraps the store in an adapter.
    pub async fn connect_redis(config: SharedCacheConfig) -> CacheResult<Self> {
        let l2_config = L2Config::from_shared(&config);
        let store = RedisStore::connect(config).await?;
        Self::new(store, l2_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsSettings;

    fn connector(config: SharedCacheConfig) -> RedisConnector {
        RedisConnector::new(config).expect("valid config")
    }

    #[test]
    fn test_connector_rejects_invalid_config() {
        let config = SharedCacheConfig {
            address: "no-port".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RedisConnector::new(config),
            Err(CacheError::Configuration { .. })
        ));
    }

    #[test]
    fn test_connection_info_carries_db_and_credentials() {
        let c = connector(SharedCacheConfig {
            address: "cache:6380".to_string(),
            db: 3,
            username: Some("repo".to_string()),
            password: Some("s3cret".to_string()),
            ..Default::default()
        });

        let info = c.connection_info("cache:6380", 3, true).expect("info");
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.username.as_deref(), Some("repo"));
        assert_eq!(info.redis.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_describe_never_leaks_password() {
        let c = connector(SharedCacheConfig {
            password: Some("s3cret".to_string()),
            ..Default::default()
        });
        let described = c.describe();
        assert_eq!(described, "redis://127.0.0.1:6379/0");
        assert!(!described.contains("s3cret"));
    }

    #[test]
    fn test_describe_failover() {
        let c = connector(SharedCacheConfig {
            sentinel_addresses: vec!["s1:26379".to_string(), "s2:26379".to_string()],
            sentinel_master: "argocd".to_string(),
            ..Default::default()
        });
        assert_eq!(c.describe(), "sentinel[s1:26379,s2:26379]/argocd/0");
    }

    #[test]
    fn test_tls_scheme_and_certificates() {
        let c = connector(SharedCacheConfig {
            tls: Some(TlsSettings {
                insecure_skip_verify: true,
                ca_cert: Some(b"-----BEGIN CERTIFICATE-----\n".to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert_eq!(c.scheme(), "rediss");
        assert!(c.insecure());
        // Skip-verify wins over a CA; no client identity means no custom certificates.
        assert!(c.tls_certificates().is_none());
    }

    #[test]
    fn test_plain_config_has_no_certificates() {
        let c = connector(SharedCacheConfig::default());
        assert_eq!(c.scheme(), "redis");
        assert!(c.tls_certificates().is_none());
    }

    #[test]
    fn test_classify_separates_fatal_retryable_and_rejected() {
        let readonly = RedisError::from((ErrorKind::ReadOnly, "READONLY replica"));
        assert!(classify(readonly).is_fatal());

        let timeout = response_timed_out(Duration::from_millis(10));
        assert!(is_fatal(&timeout));

        let loading = RedisError::from((ErrorKind::BusyLoadingError, "LOADING"));
        let loading = classify(loading);
        assert!(!loading.is_fatal());
        assert!(loading.is_retryable());

        let wrong_type = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        let wrong_type = classify(wrong_type);
        assert!(matches!(wrong_type, StoreError::Rejected(_)));
        assert!(!wrong_type.is_retryable());
    }

    #[test]
    fn test_connector_uses_configured_connect_timeout() {
        let c = connector(SharedCacheConfig {
            connect_timeout: Duration::from_millis(750),
            ..Default::default()
        });
        assert_eq!(c.connect_timeout(), Duration::from_millis(750));
    }
}
