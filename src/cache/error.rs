use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
/// Errors returned by every cache tier.
pub enum CacheError {
    /// Input rejected before any I/O (nil value/destination, bad compression selector).
    #[error("validation failed: {reason}")]
    Validation {
        /// Error message.
        reason: String,
    },

    /// The key is absent. Callers are expected to recompute.
    #[error("cache key not found: {key}")]
    NotFound {
        /// The full (versioned) key.
        key: String,
    },

    /// The shared tier stayed unreachable after the whole retry budget.
    #[error("shared cache unavailable after {attempts} attempt(s): {reason}")]
    Connection {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last transport error.
        reason: String,
    },

    /// Stored bytes could not be decoded (includes writer/reader compression mismatch), or
    /// the shared tier refused the command for the stored value.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Error message.
        reason: String,
    },

    /// Invalid construction parameters (topology, transport-security material).
    #[error("configuration error: {reason}")]
    Configuration {
        /// Error message.
        reason: String,
    },
}

impl CacheError {
    pub fn validation(reason: impl Into<String>) -> Self {
        CacheError::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        CacheError::NotFound { key: key.into() }
    }

    pub fn serialization(reason: impl std::fmt::Display) -> Self {
        CacheError::Serialization {
            reason: reason.to_string(),
        }
    }

    pub fn configuration(reason: impl std::fmt::Display) -> Self {
        CacheError::Configuration {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for [`CacheError::NotFound`].
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    #[inline]
    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection { .. })
    }
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        CacheError::configuration(err)
    }
}

/// Convenience result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
