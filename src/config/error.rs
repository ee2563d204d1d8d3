//! Configuration error types.

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric environment variable could not be parsed.
    #[error("failed to parse {name}='{value}': {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A boolean environment variable was not one of `true/false/1/0/yes/no`.
    #[error("invalid boolean {name}='{value}'")]
    InvalidBool { name: &'static str, value: String },

    /// Compression selector is not `none` or `gzip`.
    #[error("unknown compression type '{value}' (expected 'none' or 'gzip')")]
    InvalidCompression { value: String },

    /// Endpoint is not of the form `host:port`.
    #[error("invalid endpoint address '{value}': expected host:port")]
    InvalidAddress { value: String },

    /// Failover topology requested without a master group name.
    #[error("sentinel addresses configured but master group name is empty")]
    MissingSentinelMaster,

    /// Client certificate and key must be supplied together.
    #[error("client certificate and client key must both be provided")]
    IncompleteClientCertificate,

    /// Certificate or key material is not PEM-encoded.
    #[error("transport security material is invalid: {reason}")]
    InvalidTls { reason: String },

    /// Connection and command timeouts must be positive.
    #[error("{name} must be > 0")]
    ZeroTimeout { name: &'static str },

    /// Local tier must be able to hold at least one entry.
    #[error("local cache capacity must be > 0")]
    ZeroCapacity,
}
