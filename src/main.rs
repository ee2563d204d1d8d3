//! coherent-probe: exercises the two-level cache against the configured Redis.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use coherent::{
    ActionOptions, Cache, CacheClient, Item, LocalCacheConfig, SharedCache, SharedCacheConfig,
    TwoLevelCache, TwoLevelConfig, update_callback,
};

const PROBE_KEY: &str = "coherent-probe";
const PROBE_TTL: Duration = Duration::from_secs(60);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ProbeRecord {
    pid: u32,
    written_at_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--health-check") {
        std::process::exit(run_health_check().await);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let shared = SharedCacheConfig::from_env()?;
    shared.validate()?;
    let local = LocalCacheConfig::from_env()?;

    tracing::info!(
        address = %shared.address,
        failover = shared.topology().is_failover(),
        db = shared.db,
        compression = %shared.compression,
        "coherent-probe starting"
    );

    let tiers = TwoLevelCache::connect_redis(shared, local, TwoLevelConfig::default()).await?;
    let cache = Cache::new(tiers);

    let shutdown = CancellationToken::new();
    let subscription = cache
        .on_updated(
            shutdown.clone(),
            PROBE_KEY,
            update_callback(|| {
                tracing::info!(key = PROBE_KEY, "invalidation received");
                Ok(())
            }),
        )
        .await?;

    let record = ProbeRecord {
        pid: std::process::id(),
        written_at_ms: SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis(),
    };
    cache
        .set_item(PROBE_KEY, Some(&record), ActionOptions::new().expiration(PROBE_TTL))
        .await?;

    let full_key = cache.full_key(PROBE_KEY);
    for _ in 0..2 {
        let (_, status) = cache.client().lookup(&full_key).await?;
        tracing::info!(key = %full_key, status = %status, "probe read");
    }

    let loaded: ProbeRecord = cache.get_item(PROBE_KEY).await?;
    anyhow::ensure!(loaded == record, "probe value did not round-trip");

    let stats = cache.client().stats();
    println!(
        "l1_hits={} l1_misses={} l2_hits={} l2_misses={}",
        stats.l1_hits, stats.l1_misses, stats.l2_hits, stats.l2_misses
    );

    shutdown.cancel();
    subscription.cancel().await;
    tracing::info!("coherent-probe complete");
    Ok(())
}

/// Round-trips a key through the shared tier. Exit code 0 when healthy.
async fn run_health_check() -> i32 {
    let check = async {
        let shared = SharedCacheConfig::from_env()?;
        let l2 = SharedCache::connect_redis(shared).await?;
        let key = format!("{PROBE_KEY}-health|{}", std::process::id());
        l2.set(
            &Item::new(key.as_str(), b"ok".to_vec())
                .with_options(ActionOptions::new().expiration(Duration::from_secs(5))),
        )
        .await?;
        let value = l2.get(&key).await?;
        l2.delete(&key).await?;
        anyhow::ensure!(value == b"ok", "health probe mismatch");
        anyhow::Ok(())
    };

    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => 0,
        _ => 1,
    }
}
