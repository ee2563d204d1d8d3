use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::cache::client::CacheClient;
use crate::cache::compression::CompressionMode;
use crate::cache::error::CacheError;
use crate::cache::subscription::{UpdateCallback, update_callback};
use crate::cache::types::{ActionOptions, Item};

fn fast_config() -> L2Config {
    L2Config::default()
        .retry_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .resubscribe_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

fn counting(counter: &Arc<AtomicUsize>) -> UpdateCallback {
    let counter = Arc::clone(counter);
    update_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

async fn wait_for(counter: &AtomicUsize, at_least: usize) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while counter.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_set_get_roundtrip_gzip() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();

    cache
        .set(&Item::new("app|1.8.3", b"{\"sync\":\"Synced\"}".to_vec()))
        .await
        .unwrap();

    let value = cache.get("app|1.8.3").await.unwrap();
    assert_eq!(value, b"{\"sync\":\"Synced\"}");

    // Stored form is gzip, not the plain payload.
    let raw = cache.store().raw("app|1.8.3").unwrap();
    assert_ne!(raw, value);
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn test_set_get_roundtrip_uncompressed() {
    let cache =
        MockSharedCache::new_mock(fast_config().compression(CompressionMode::None)).unwrap();

    cache.set(&Item::new("k", b"plain".to_vec())).await.unwrap();

    assert_eq!(cache.get("k").await.unwrap(), b"plain");
    assert_eq!(cache.store().raw("k").unwrap(), b"plain");
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();

    let err = cache.get("absent").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, CacheError::NotFound { key } if key == "absent"));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();

    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();
    cache.delete("k").await.unwrap();
    cache.delete("k").await.unwrap();

    assert!(cache.get("k").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_through_set_skips_value_check() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    cache.set(&Item::deletion("k")).await.unwrap();

    assert!(cache.get("k").await.unwrap_err().is_not_found());
    assert_eq!(cache.store().call_counts().sets, 1);
    assert_eq!(cache.store().call_counts().deletes, 1);
}

#[tokio::test]
async fn test_nil_value_is_validation_error() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let item = Item {
        key: "k".to_string(),
        value: None,
        options: ActionOptions::new(),
    };

    let err = cache.set(&item).await.unwrap_err();
    assert!(matches!(err, CacheError::Validation { .. }));
    assert_eq!(cache.store().call_counts().sets, 0);
}

#[tokio::test]
async fn test_default_expiration_applied() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();

    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    let ttl = cache.store().ttl("k").unwrap();
    assert!(ttl > Duration::from_secs(23 * 3600), "ttl was {ttl:?}");
    assert!(ttl <= Duration::from_secs(24 * 3600));
}

#[tokio::test]
async fn test_expiration_override() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let item = Item::new("k", b"v".to_vec())
        .with_options(ActionOptions::new().expiration(Duration::from_secs(5)));

    cache.set(&item).await.unwrap();

    let ttl = cache.store().ttl("k").unwrap();
    assert!(ttl <= Duration::from_secs(5));
    assert!(ttl > Duration::from_secs(3));
}

#[tokio::test]
async fn test_zero_expiration_never_expires() {
    let cache =
        MockSharedCache::new_mock(fast_config().default_expiration(Duration::ZERO)).unwrap();

    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    assert!(cache.store().raw("k").is_some());
    assert!(cache.store().ttl("k").is_none());
}

#[tokio::test]
async fn test_expired_entry_is_not_found() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let item = Item::new("k", b"v".to_vec())
        .with_options(ActionOptions::new().expiration(Duration::from_millis(20)));

    cache.set(&item).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(cache.get("k").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_disable_overwrite_keeps_existing() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();

    cache.set(&Item::new("k", b"first".to_vec())).await.unwrap();
    let second = Item::new("k", b"second".to_vec())
        .with_options(ActionOptions::new().disable_overwrite(true));
    cache.set(&second).await.unwrap();

    assert_eq!(cache.get("k").await.unwrap(), b"first");

    let fresh = Item::new("other", b"second".to_vec())
        .with_options(ActionOptions::new().disable_overwrite(true));
    cache.set(&fresh).await.unwrap();
    assert_eq!(cache.get("other").await.unwrap(), b"second");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(3)).unwrap();
    cache.store().fail_next_transient(2);

    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    assert_eq!(cache.store().call_counts().sets, 3);
    assert_eq!(cache.get("k").await.unwrap(), b"v");
}

#[tokio::test]
async fn test_retry_exhaustion_is_connection_error() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(2)).unwrap();
    cache.store().fail_next(10);

    let err = cache.get("k").await.unwrap_err();

    assert!(err.is_connection());
    assert!(matches!(err, CacheError::Connection { attempts: 3, .. }));
    assert_eq!(cache.store().call_counts().gets, 3);
}

#[tokio::test]
async fn test_rejected_command_is_not_retried() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(3)).unwrap();
    cache.store().reject_next(1);

    let err = cache.get("k").await.unwrap_err();

    assert!(matches!(err, CacheError::Serialization { .. }));
    assert!(!err.is_connection());
    assert_eq!(cache.store().call_counts().gets, 1);
}

#[tokio::test]
async fn test_zero_retries_single_attempt() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(0)).unwrap();
    cache.store().fail_next_transient(1);

    let err = cache.delete("k").await.unwrap_err();
    assert!(matches!(err, CacheError::Connection { attempts: 1, .. }));
}

#[tokio::test]
async fn test_compression_mismatch_is_serialization_error() {
    let store = MockSharedStore::new();
    let writer =
        MockSharedCache::attach_mock(&store, fast_config().compression(CompressionMode::None))
            .unwrap();
    let reader = MockSharedCache::attach_mock(&store, fast_config()).unwrap();

    writer.set(&Item::new("k", b"not gzip".to_vec())).await.unwrap();

    let err = reader.get("k").await.unwrap_err();
    assert!(matches!(err, CacheError::Serialization { .. }));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = fast_config().retry_backoff(Duration::from_secs(2), Duration::from_secs(1));
    let err = MockSharedCache::new_mock(config).unwrap_err();
    assert!(matches!(err, CacheError::Configuration { .. }));
}

#[tokio::test]
async fn test_notify_reaches_other_process() {
    let store = MockSharedStore::new();
    let a = MockSharedCache::attach_mock(&store, fast_config()).unwrap();
    let b = MockSharedCache::attach_mock(&store, fast_config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let sub = a
        .on_updated(CancellationToken::new(), "app|1.8.3", counting(&hits))
        .await
        .unwrap();

    b.notify_updated("app|1.8.3").await.unwrap();

    assert!(wait_for(&hits, 1).await);
    sub.cancel().await;
}

#[tokio::test]
async fn test_notify_reaches_own_subscriber() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let sub = cache
        .on_updated(CancellationToken::new(), "k", counting(&hits))
        .await
        .unwrap();
    cache.notify_updated("k").await.unwrap();

    assert!(wait_for(&hits, 1).await);
    sub.cancel().await;
}

#[tokio::test]
async fn test_notify_other_key_ignored() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let sub = cache
        .on_updated(CancellationToken::new(), "k", counting(&hits))
        .await
        .unwrap();
    cache.notify_updated("other").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    sub.cancel().await;
}

#[tokio::test]
async fn test_notify_without_subscribers_succeeds() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    cache.notify_updated("nobody-listens").await.unwrap();
    assert_eq!(cache.store().call_counts().publishes, 1);
}

#[tokio::test]
async fn test_notify_is_not_retried() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(5)).unwrap();
    cache.store().fail_next_transient(1);

    let err = cache.notify_updated("k").await.unwrap_err();

    assert!(matches!(err, CacheError::Connection { attempts: 1, .. }));
    assert_eq!(cache.store().call_counts().publishes, 1);
}

#[tokio::test]
async fn test_cancelled_subscription_stops_callbacks() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let sub = cache
        .on_updated(CancellationToken::new(), "k", counting(&hits))
        .await
        .unwrap();
    sub.cancel().await;

    cache.notify_updated("k").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_subscription_restored_after_link_drop() {
    let cache = MockSharedCache::new_mock(fast_config()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let sub = cache
        .on_updated(CancellationToken::new(), "k", counting(&hits))
        .await
        .unwrap();
    assert_eq!(cache.store().call_counts().subscribes, 1);

    cache.store().drop_subscriptions();

    // Restoring the link delivers one catch-up event for anything missed.
    assert!(wait_for(&hits, 1).await);
    assert!(cache.store().call_counts().subscribes >= 2);

    cache.notify_updated("k").await.unwrap();
    assert!(wait_for(&hits, 2).await);

    sub.cancel().await;
}

#[tokio::test]
async fn test_initial_subscribe_failure_is_retried() {
    let cache = MockSharedCache::new_mock(fast_config().max_retries(3)).unwrap();
    cache.store().fail_next(2);

    let sub = cache
        .on_updated(CancellationToken::new(), "k", counting(&Arc::new(AtomicUsize::new(0))))
        .await
        .unwrap();

    assert_eq!(cache.store().call_counts().subscribes, 3);
    sub.cancel().await;
}

#[tokio::test]
async fn test_supervised_store_rebuilds_after_fault() {
    let server = MockSharedStore::new();
    let store = SupervisedMockStore::connect(server.clone(), "redis://cache:6379/0")
        .await
        .unwrap();
    let cache = SharedCache::new(store, fast_config()).unwrap();

    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();
    let before = cache.store().supervisor().current();
    assert_eq!(before.generation(), 0);

    cache.store().break_connection();

    // Same adapter handle: the fault is absorbed by a rebuild and the retry succeeds.
    assert_eq!(cache.get("k").await.unwrap(), b"v");

    let supervisor = cache.store().supervisor();
    let after = supervisor.current();
    assert_eq!(after.generation(), 1);
    assert_eq!(supervisor.rebuild_count(), 1);
    assert_eq!(supervisor.connector().builds(), 2);
    assert_ne!(after.connection().id(), before.connection().id());
    assert_eq!(after.connection().params(), before.connection().params());
    assert!(!after.connection().is_broken());
}

#[tokio::test]
async fn test_supervised_store_concurrent_faults_single_rebuild() {
    let server = MockSharedStore::new();
    let store = SupervisedMockStore::connect(server, "redis://cache:6379/0")
        .await
        .unwrap();
    let cache = SharedCache::new(store, fast_config().max_retries(3)).unwrap();
    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    cache.store().break_connection();

    let mut reads = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        reads.push(tokio::spawn(async move { cache.get("k").await }));
    }
    for read in reads {
        assert_eq!(read.await.unwrap().unwrap(), b"v");
    }

    assert_eq!(cache.store().supervisor().rebuild_count(), 1);
}

#[tokio::test]
async fn test_transient_errors_do_not_rebuild() {
    let server = MockSharedStore::new();
    let store = SupervisedMockStore::connect(server.clone(), "redis://cache:6379/0")
        .await
        .unwrap();
    let cache = SharedCache::new(store, fast_config()).unwrap();

    server.fail_next_transient(2);
    cache.set(&Item::new("k", b"v".to_vec())).await.unwrap();

    assert_eq!(cache.store().supervisor().rebuild_count(), 0);
    assert_eq!(cache.store().supervisor().generation(), 0);
}
