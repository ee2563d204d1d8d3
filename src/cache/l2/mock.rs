//! In-memory shared store for tests: one "server" that several simulated processes can
//! share by cloning, with call counting, fault injection and a supervised variant that
//! exercises connection rebuilds.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::future::ready;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::cache::error::CacheResult;
use crate::cache::supervisor::{ConnectionSupervisor, Connector};

use super::backend::{NotificationStream, SharedStore};
use super::cache::SharedCache;
use super::config::L2Config;
use super::error::{StoreError, StoreResult};

const CHANNEL_CAPACITY: usize = 1024;

const FAIL_FATAL: u8 = 0;
const FAIL_TRANSIENT: u8 = 1;
const FAIL_REJECTED: u8 = 2;

/// Number of store calls observed, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub publishes: u64,
    pub subscribes: u64,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    publishes: AtomicU64,
    subscribes: AtomicU64,
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

struct MockServer {
    entries: Mutex<HashMap<String, StoredValue>>,
    channel: Mutex<broadcast::Sender<String>>,
    counters: Counters,
    failures_remaining: AtomicU32,
    failure_kind: AtomicU8,
    primary: AtomicU64,
}

/// In-memory stand-in for the shared cache service. Clones share the same data.
#[derive(Clone)]
pub struct MockSharedStore {
    server: Arc<MockServer>,
}

impl MockSharedStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            server: Arc::new(MockServer {
                entries: Mutex::new(HashMap::new()),
                channel: Mutex::new(tx),
                counters: Counters::default(),
                failures_remaining: AtomicU32::new(0),
                failure_kind: AtomicU8::new(FAIL_FATAL),
                primary: AtomicU64::new(0),
            }),
        }
    }

    pub fn call_counts(&self) -> CallCounts {
        let c = &self.server.counters;
        CallCounts {
            gets: c.gets.load(Ordering::SeqCst),
            sets: c.sets.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
            publishes: c.publishes.load(Ordering::SeqCst),
            subscribes: c.subscribes.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counts(&self) {
        let c = &self.server.counters;
        c.gets.store(0, Ordering::SeqCst);
        c.sets.store(0, Ordering::SeqCst);
        c.deletes.store(0, Ordering::SeqCst);
        c.publishes.store(0, Ordering::SeqCst);
        c.subscribes.store(0, Ordering::SeqCst);
    }

    /// The next `n` operations fail with a fatal (connection) error.
    pub fn fail_next(&self, n: u32) {
        self.inject(FAIL_FATAL, n);
    }

    /// The next `n` operations fail with a transient (command) error.
    pub fn fail_next_transient(&self, n: u32) {
        self.inject(FAIL_TRANSIENT, n);
    }

    /// The next `n` operations are refused by the server (like WRONGTYPE).
    pub fn reject_next(&self, n: u32) {
        self.inject(FAIL_REJECTED, n);
    }

    fn inject(&self, kind: u8, n: u32) {
        self.server.failure_kind.store(kind, Ordering::SeqCst);
        self.server.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Raw stored bytes, as written by the adapter (after compression).
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.server
            .entries
            .lock()
            .get(key)
            .filter(|v| v.is_live())
            .map(|v| v.bytes.clone())
    }

    /// Remaining lifetime of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.server
            .entries
            .lock()
            .get(key)
            .and_then(|v| v.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.server
            .entries
            .lock()
            .values()
            .filter(|v| v.is_live())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node currently acting as primary for sentinel-style connections.
    pub fn primary(&self) -> u64 {
        self.server.primary.load(Ordering::SeqCst)
    }

    /// Promotes a replica: connections bound to the old primary start answering READONLY.
    /// Data is kept, as if fully replicated.
    pub fn fail_over(&self) {
        self.server.primary.fetch_add(1, Ordering::SeqCst);
    }

    /// Ends every open subscription stream, as if the pub/sub link dropped.
    pub fn drop_subscriptions(&self) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        *self.server.channel.lock() = tx;
    }

    fn take_failure(&self) -> StoreResult<()> {
        let injected = self
            .server
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !injected {
            return Ok(());
        }
        Err(match self.server.failure_kind.load(Ordering::SeqCst) {
            FAIL_FATAL => StoreError::Fatal("injected: connection reset by peer".to_string()),
            FAIL_TRANSIENT => StoreError::Transient("injected: command failed".to_string()),
            _ => StoreError::Rejected(
                "injected: WRONGTYPE Operation against a key holding the wrong kind of value"
                    .to_string(),
            ),
        })
    }
}

impl Default for MockSharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockSharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSharedStore")
            .field("entries", &self.len())
            .field("calls", &self.call_counts())
            .finish()
    }
}

impl SharedStore for MockSharedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.server.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(self.raw(key))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> StoreResult<()> {
        self.server.counters.sets.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let mut entries = self.server.entries.lock();
        if only_if_absent && entries.get(key).is_some_and(StoredValue::is_live) {
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.server.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        self.server.entries.lock().remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str) -> StoreResult<()> {
        self.server.counters.publishes.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let _ = self.server.channel.lock().send(channel.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        self.server.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let rx = self.server.channel.lock().subscribe();
        let wanted = channel.to_string();
        Ok(BroadcastStream::new(rx)
            .filter_map(move |msg| {
                ready(match msg {
                    Ok(ch) if ch == wanted => Some(()),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(_)) => Some(()),
                })
            })
            .boxed())
    }
}

/// Type alias for an L2 adapter backed by the in-memory store.
pub type MockSharedCache = SharedCache<MockSharedStore>;

impl SharedCache<MockSharedStore> {
    /// Creates an adapter over a fresh in-memory store.
    pub fn new_mock(config: L2Config) -> CacheResult<Self> {
        Self::new(MockSharedStore::new(), config)
    }

    /// Creates an adapter attached to an existing in-memory store ("another process").
    pub fn attach_mock(store: &MockSharedStore, config: L2Config) -> CacheResult<Self> {
        Self::new(store.clone(), config)
    }
}

/// Connection to the in-memory server that can be broken on demand.
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    params: String,
    /// Primary this connection was resolved to, in failover mode.
    node: Option<u64>,
    broken: AtomicBool,
    server: MockSharedStore,
}

impl MockConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn node(&self) -> Option<u64> {
        self.node
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_broken() {
            return Err(StoreError::Fatal(format!("connection {} is broken", self.id)));
        }
        match self.node {
            Some(node) if node != self.server.primary() => Err(StoreError::Fatal(format!(
                "READONLY node {node} is no longer primary"
            ))),
            _ => Ok(()),
        }
    }
}

/// Builds [`MockConnection`]s from captured parameters, counting builds.
#[derive(Debug)]
pub struct MockConnector {
    server: MockSharedStore,
    params: String,
    failover: bool,
    builds: AtomicU64,
}

impl MockConnector {
    pub fn new(server: MockSharedStore, params: impl Into<String>) -> Self {
        Self {
            server,
            params: params.into(),
            failover: false,
            builds: AtomicU64::new(0),
        }
    }

    /// Resolves the current primary of `server` on every connect, like a sentinel set.
    pub fn sentinel(server: MockSharedStore, master_name: &str) -> Self {
        Self {
            server,
            params: format!("sentinel[mock]/{master_name}"),
            failover: true,
            builds: AtomicU64::new(0),
        }
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> CacheResult<MockConnection> {
        let id = self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id,
            params: self.params.clone(),
            node: self.failover.then(|| self.server.primary()),
            broken: AtomicBool::new(false),
            server: self.server.clone(),
        })
    }

    fn describe(&self) -> String {
        self.params.clone()
    }
}

/// Store that routes every call through a [`ConnectionSupervisor`], like the Redis store.
#[derive(Debug)]
pub struct SupervisedMockStore {
    supervisor: ConnectionSupervisor<MockConnector>,
}

impl SupervisedMockStore {
    pub async fn connect(server: MockSharedStore, params: impl Into<String>) -> CacheResult<Self> {
        let supervisor = ConnectionSupervisor::connect(MockConnector::new(server, params)).await?;
        Ok(Self { supervisor })
    }

    /// Failover topology: follows `server`'s primary across [`MockSharedStore::fail_over`].
    pub async fn connect_failover(server: MockSharedStore, master_name: &str) -> CacheResult<Self> {
        let supervisor =
            ConnectionSupervisor::connect(MockConnector::sentinel(server, master_name)).await?;
        Ok(Self { supervisor })
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<MockConnector> {
        &self.supervisor
    }

    /// Simulates a fatal fault on the live connection.
    pub fn break_connection(&self) {
        self.supervisor
            .current()
            .connection()
            .broken
            .store(true, Ordering::SeqCst);
    }

    async fn observed<T>(&self, generation: u64, outcome: StoreResult<T>) -> StoreResult<T> {
        self.supervisor
            .observe(generation, outcome, StoreError::is_fatal)
            .await
    }
}

impl SharedStore for SupervisedMockStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let lease = self.supervisor.current();
        let conn = lease.connection();
        let outcome = match conn.check() {
            Ok(()) => conn.server.get(key).await,
            Err(e) => Err(e),
        };
        self.observed(lease.generation(), outcome).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        only_if_absent: bool,
    ) -> StoreResult<()> {
        let lease = self.supervisor.current();
        let conn = lease.connection();
        let outcome = match conn.check() {
            Ok(()) => conn.server.set(key, value, ttl, only_if_absent).await,
            Err(e) => Err(e),
        };
        self.observed(lease.generation(), outcome).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let lease = self.supervisor.current();
        let conn = lease.connection();
        let outcome = match conn.check() {
            Ok(()) => conn.server.delete(key).await,
            Err(e) => Err(e),
        };
        self.observed(lease.generation(), outcome).await
    }

    async fn publish(&self, channel: &str) -> StoreResult<()> {
        let lease = self.supervisor.current();
        let conn = lease.connection();
        let outcome = match conn.check() {
            Ok(()) => conn.server.publish(channel).await,
            Err(e) => Err(e),
        };
        self.observed(lease.generation(), outcome).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        let lease = self.supervisor.current();
        let conn = lease.connection();
        let outcome = match conn.check() {
            Ok(()) => conn.server.subscribe(channel).await,
            Err(e) => Err(e),
        };
        self.observed(lease.generation(), outcome).await
    }
}
