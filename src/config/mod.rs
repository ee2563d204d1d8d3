//! Injected configuration for the cache tiers.
//!
//! Structures here are built once at startup (explicitly or with `from_env`) and handed
//! to constructors; nothing inside the cache core reads the environment.

pub mod error;


pub use error::ConfigError;

use std::env;
use std::time::Duration;

use crate::cache::compression::CompressionMode;
use crate::constants::{
    DEFAULT_CACHE_EXPIRATION, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOCAL_CAPACITY, DEFAULT_LOCAL_TTL,
    DEFAULT_REDIS_ADDRESS, DEFAULT_REDIS_RETRY_COUNT, DEFAULT_RESPONSE_TIMEOUT,
    DEFAULT_SENTINEL_MASTER,
};

/// Transport-security material for the shared-cache connection.
///
/// Certificates and keys are PEM bytes; reading them from disk is the caller's job.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    /// Root CA for server verification. `None` uses the system trust store.
    pub ca_cert: Option<Vec<u8>>,
    /// Skip server certificate validation. Takes precedence over `ca_cert`.
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(ConfigError::IncompleteClientCertificate);
        }
        for (name, pem) in [
            ("client certificate", &self.client_cert),
            ("client key", &self.client_key),
            ("CA certificate", &self.ca_cert),
        ] {
            if let Some(bytes) = pem {
                if !bytes.windows(10).any(|w| w == b"-----BEGIN") {
                    return Err(ConfigError::InvalidTls {
                        reason: format!("{name} is not PEM encoded"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn has_client_identity(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("ca_cert", &self.ca_cert.as_ref().map(Vec::len))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// How the shared cache is reached. Chosen once, invisible above the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// One fixed endpoint.
    Single { address: String },
    /// A sentinel monitor set that reports the current primary of `master_name`.
    Failover {
        master_name: String,
        sentinel_addresses: Vec<String>,
    },
}

impl Topology {
    pub fn is_failover(&self) -> bool {
        matches!(self, Topology::Failover { .. })
    }
}

/// Connection and encoding parameters for the shared (L2) tier.
#[derive(Debug, Clone)]
pub struct SharedCacheConfig {
    /// Single-endpoint address (`host:port`). Ignored when sentinels are configured.
    pub address: String,
    /// Sentinel `host:port` list. Non-empty selects failover mode.
    pub sentinel_addresses: Vec<String>,
    pub sentinel_master: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub max_retries: u32,
    pub compression: CompressionMode,
    /// Expiration applied when an item carries no override. Zero disables expiry.
    pub default_expiration: Duration,
    /// Bound on building a connection (and resolving the primary in failover mode).
    pub connect_timeout: Duration,
    /// Bound on one command round-trip. Expiry counts as a broken connection.
    pub response_timeout: Duration,
    pub tls: Option<TlsSettings>,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_REDIS_ADDRESS.to_string(),
            sentinel_addresses: Vec::new(),
            sentinel_master: DEFAULT_SENTINEL_MASTER.to_string(),
            username: None,
            password: None,
            db: 0,
            max_retries: DEFAULT_REDIS_RETRY_COUNT,
            compression: CompressionMode::GZip,
            default_expiration: DEFAULT_CACHE_EXPIRATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            tls: None,
        }
    }
}

impl SharedCacheConfig {
    const ENV_SERVER: &'static str = "REDIS_SERVER";
    const ENV_DB: &'static str = "REDISDB";
    const ENV_SENTINEL_ADDRS: &'static str = "REDIS_SENTINEL_ADDRS";
    const ENV_SENTINEL_MASTER: &'static str = "REDIS_SENTINEL_MASTER";
    const ENV_USERNAME: &'static str = "REDIS_USERNAME";
    const ENV_PASSWORD: &'static str = "REDIS_PASSWORD";
    const ENV_RETRY_COUNT: &'static str = "REDIS_RETRY_COUNT";
    const ENV_COMPRESSION: &'static str = "REDIS_COMPRESSION";
    const ENV_DEFAULT_EXPIRATION: &'static str = "REDIS_DEFAULT_EXPIRATION_SECS";
    const ENV_CONNECT_TIMEOUT: &'static str = "REDIS_CONNECT_TIMEOUT_MS";
    const ENV_RESPONSE_TIMEOUT: &'static str = "REDIS_RESPONSE_TIMEOUT_MS";
    const ENV_USE_TLS: &'static str = "REDIS_USE_TLS";
    const ENV_INSECURE: &'static str = "REDIS_INSECURE_SKIP_TLS_VERIFY";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let address = parse_string_from_env(Self::ENV_SERVER, defaults.address);
        let db = parse_i64_from_env(Self::ENV_DB, defaults.db)?;
        let sentinel_addresses = parse_list_from_env(Self::ENV_SENTINEL_ADDRS);
        let sentinel_master =
            parse_string_from_env(Self::ENV_SENTINEL_MASTER, defaults.sentinel_master);
        let username = parse_optional_string_from_env(Self::ENV_USERNAME);
        let password = parse_optional_string_from_env(Self::ENV_PASSWORD);
        let max_retries = parse_u64_from_env(Self::ENV_RETRY_COUNT, defaults.max_retries as u64)?
            .min(u32::MAX as u64) as u32;
        let compression = match env::var(Self::ENV_COMPRESSION) {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidCompression { value })?,
            Err(_) => defaults.compression,
        };
        let default_expiration = Duration::from_secs(parse_u64_from_env(
            Self::ENV_DEFAULT_EXPIRATION,
            defaults.default_expiration.as_secs(),
        )?);
        let connect_timeout = Duration::from_millis(parse_u64_from_env(
            Self::ENV_CONNECT_TIMEOUT,
            defaults.connect_timeout.as_millis() as u64,
        )?);
        let response_timeout = Duration::from_millis(parse_u64_from_env(
            Self::ENV_RESPONSE_TIMEOUT,
            defaults.response_timeout.as_millis() as u64,
        )?);

        let tls = if parse_bool_from_env(Self::ENV_USE_TLS, false)? {
            Some(TlsSettings {
                insecure_skip_verify: parse_bool_from_env(Self::ENV_INSECURE, false)?,
                ..Default::default()
            })
        } else {
            None
        };

        Ok(Self {
            address,
            sentinel_addresses,
            sentinel_master,
            username,
            password,
            db,
            max_retries,
            compression,
            default_expiration,
            connect_timeout,
            response_timeout,
            tls,
        })
    }

    /// Resolves the topology: failover when any sentinel address is configured.
    pub fn topology(&self) -> Topology {
        if self.sentinel_addresses.is_empty() {
            Topology::Single {
                address: self.address.clone(),
            }
        } else {
            Topology::Failover {
                master_name: self.sentinel_master.clone(),
                sentinel_addresses: self.sentinel_addresses.clone(),
            }
        }
    }

    /// Checks addresses, topology parameters and TLS material. Does not connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.topology() {
            Topology::Single { address } => validate_address(&address)?,
            Topology::Failover {
                master_name,
                sentinel_addresses,
            } => {
                if master_name.trim().is_empty() {
                    return Err(ConfigError::MissingSentinelMaster);
                }
                for address in &sentinel_addresses {
                    validate_address(address)?;
                }
            }
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                name: "connect_timeout",
            });
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                name: "response_timeout",
            });
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Bounds for the per-process (L1) tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCacheConfig {
    /// Max entries before eviction. Default: `10_000`.
    pub capacity: u64,
    /// Entry lifetime in this process. Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOCAL_CAPACITY,
            ttl: DEFAULT_LOCAL_TTL,
        }
    }
}

impl LocalCacheConfig {
    const ENV_CAPACITY: &'static str = "CACHE_LOCAL_CAPACITY";
    const ENV_TTL: &'static str = "CACHE_LOCAL_TTL_SECS";

    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let capacity = parse_u64_from_env(Self::ENV_CAPACITY, defaults.capacity)?;
        let ttl = Duration::from_secs(parse_u64_from_env(Self::ENV_TTL, defaults.ttl.as_secs())?);
        let config = Self { capacity, ttl };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Behaviour switches for the two-level composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoLevelConfig {
    /// Publish an invalidation for the key after every write or delete.
    pub notify_on_write: bool,
}

impl Default for TwoLevelConfig {
    fn default() -> Self {
        Self {
            notify_on_write: true,
        }
    }
}

fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidAddress {
        value: address.to_string(),
    };
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().map_or(true, |p| p == 0) {
        return Err(invalid());
    }
    Ok(())
}

fn parse_string_from_env(var_name: &str, default: String) -> String {
    env::var(var_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
    env::var(var_name).ok().filter(|v| !v.is_empty())
}

fn parse_list_from_env(var_name: &str) -> Vec<String> {
    env::var(var_name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_u64_from_env(var_name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidNumber {
                name: var_name,
                value,
                source: e,
            }),
        Err(_) => Ok(default),
    }
}

fn parse_i64_from_env(var_name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidNumber {
                name: var_name,
                value,
                source: e,
            }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_from_env(var_name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var_name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                name: var_name,
                value,
            }),
        },
        Err(_) => Ok(default),
    }
}
