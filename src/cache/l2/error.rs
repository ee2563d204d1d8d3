use thiserror::Error;

#[derive(Debug, Error)]
/// Failure reported by a [`super::SharedStore`].
///
/// The adapter retries `Fatal` and `Transient` and maps exhaustion to
/// [`crate::cache::CacheError::Connection`]. `Rejected` is returned at once as
/// [`crate::cache::CacheError::Serialization`].
pub enum StoreError {
    /// The connection itself is unusable (broken pipe, refused, stale primary).
    #[error("connection unusable: {0}")]
    Fatal(String),

    /// The command failed but the connection is still healthy; retrying may succeed
    /// (loading, failover in progress, busy server).
    #[error("command failed: {0}")]
    Transient(String),

    /// The server refused the command for this key (WRONGTYPE, bad reply type).
    #[error("command rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Fatal(_))
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
