//! Shared fixtures and the cache contract suite used by every integration test.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use coherent::{CacheClient, CacheError, Item, L2Config, UpdateCallback, update_callback};
use tokio_util::sync::CancellationToken;

pub const NOTIFY_WINDOW: Duration = Duration::from_secs(2);

/// Adapter config with millisecond backoffs so failure tests stay fast.
pub fn fast_l2_config() -> L2Config {
    L2Config::default()
        .retry_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .resubscribe_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

/// Callback that counts invocations.
pub fn counting_callback() -> (Arc<AtomicUsize>, UpdateCallback) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let callback = update_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hits, callback)
}

/// Waits until `counter` reaches `at_least`, or gives up after [`NOTIFY_WINDOW`].
pub async fn wait_for_count(counter: &AtomicUsize, at_least: usize) -> bool {
    tokio::time::timeout(NOTIFY_WINDOW, async {
        while counter.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Payloads of several sizes, including empty and incompressible ones.
pub fn payloads() -> Vec<Vec<u8>> {
    let mut noisy = Vec::with_capacity(64 * 1024);
    let mut x: u32 = 0x9e37_79b9;
    for _ in 0..64 * 1024 {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        noisy.push(x as u8);
    }
    vec![
        Vec::new(),
        b"x".to_vec(),
        br#"{"status":"Synced","health":"Healthy"}"#.to_vec(),
        vec![b'a'; 1024 * 1024],
        noisy,
    ]
}

/// The behaviour every [`CacheClient`] must share, whatever tier or topology backs it.
pub async fn assert_cache_contract<C: CacheClient>(client: &C, prefix: &str) {
    let key = |name: &str| format!("{prefix}:{name}|test");

    for (i, payload) in payloads().into_iter().enumerate() {
        let k = key(&format!("payload-{i}"));
        client
            .set(&Item::new(k.as_str(), payload.clone()))
            .await
            .expect("set should succeed");
        let loaded = client.get(&k).await.expect("get after set should succeed");
        assert_eq!(loaded, payload, "payload {i} did not round-trip");
    }

    let k = key("deleted");
    client.set(&Item::new(k.as_str(), b"v".to_vec())).await.unwrap();
    client.delete(&k).await.unwrap();
    assert!(matches!(
        client.get(&k).await,
        Err(CacheError::NotFound { .. })
    ));
    client.delete(&k).await.expect("deleting an absent key is not an error");

    let k = key("delete-through-set");
    client.set(&Item::new(k.as_str(), b"v".to_vec())).await.unwrap();
    client.set(&Item::deletion(k.as_str())).await.unwrap();
    assert!(client.get(&k).await.unwrap_err().is_not_found());

    let nil = Item {
        key: key("nil"),
        value: None,
        options: Default::default(),
    };
    assert!(matches!(
        client.set(&nil).await,
        Err(CacheError::Validation { .. })
    ));

    let k = key("notify");
    let (hits, callback) = counting_callback();
    let subscription = client
        .on_updated(CancellationToken::new(), &k, callback)
        .await
        .expect("subscribe should succeed");
    client.notify_updated(&k).await.unwrap();
    assert!(
        wait_for_count(&hits, 1).await,
        "own notification not delivered"
    );
    subscription.cancel().await;
}
