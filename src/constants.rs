//! Cross-cutting, shared defaults.
//!
//! Deployment-facing values (retry budget, expirations, capacities) are only defaults:
//! every one of them can be overridden through [`crate::config`].

use std::time::Duration;

/// Suffix appended to every logical key (`"{key}|{version}"`).
///
/// Bump when the encoded layout of cached values changes so that replicas running
/// different releases never decode each other's entries.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.8.3";

/// Separator between the logical key and the schema version.
pub const KEY_VERSION_SEPARATOR: char = '|';

pub const DEFAULT_REDIS_ADDRESS: &str = "127.0.0.1:6379";
pub const DEFAULT_SENTINEL_MASTER: &str = "master";
pub const DEFAULT_REDIS_RETRY_COUNT: u32 = 3;

/// Upper bound on building one shared-tier connection, sentinel lookup included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single shared-tier command round-trip.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default shared-tier expiration (24h).
pub const DEFAULT_CACHE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_LOCAL_CAPACITY: u64 = 10_000;

/// Default local-tier TTL. Kept well under the shared-tier expiration.
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Initial delay between shared-tier retries; doubled per attempt.
pub const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(8);
pub const RETRY_MAX_BACKOFF: Duration = Duration::from_millis(512);

/// Backoff bounds for re-subscribing after a dropped pub/sub link.
pub const RESUBSCRIBE_BASE_BACKOFF: Duration = Duration::from_millis(100);
pub const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Pending invalidations buffered per subscription before coalescing kicks in.
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Callback failures buffered per subscription before new ones are only logged.
pub const SUBSCRIPTION_ERROR_BUFFER: usize = 64;

/// Exponential backoff for `attempt` (0-based), clamped to `max`.
pub fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(70);

        assert_eq!(backoff_for_attempt(base, max, 0), Duration::from_millis(10));
        assert_eq!(backoff_for_attempt(base, max, 1), Duration::from_millis(20));
        assert_eq!(backoff_for_attempt(base, max, 2), Duration::from_millis(40));
        assert_eq!(backoff_for_attempt(base, max, 3), max);
        assert_eq!(backoff_for_attempt(base, max, 200), max);
    }

    #[test]
    fn test_local_ttl_shorter_than_shared_expiration() {
        assert!(DEFAULT_LOCAL_TTL < DEFAULT_CACHE_EXPIRATION);
    }
}
