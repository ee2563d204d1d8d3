//! Connection resilience supervisor.
//!
//! Owns the live shared-cache connection behind a lock-free [`ArcSwap`]. Every connection
//! is stamped with a generation; a fault reported against generation `g` rebuilds at most
//! once, so a burst of failures on the same broken connection yields a single rebuild.
//! Readers always load either the old or the new connection as a whole.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use super::error::{CacheError, CacheResult};
use crate::constants::DEFAULT_CONNECT_TIMEOUT;

/// Builds a brand-new connection from parameters captured at construction.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = CacheResult<Self::Connection>> + Send;

    /// Human-readable target for logs (never includes credentials).
    fn describe(&self) -> String;

    /// Upper bound on one [`Connector::connect`] call.
    fn connect_timeout(&self) -> Duration {
        DEFAULT_CONNECT_TIMEOUT
    }
}

/// Runs `connector.connect()` within its timeout.
async fn connect_within<C: Connector>(connector: &C) -> CacheResult<C::Connection> {
    let limit = connector.connect_timeout();
    match tokio::time::timeout(limit, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Connection {
            attempts: 1,
            reason: format!(
                "connecting to {} timed out after {limit:?}",
                connector.describe()
            ),
        }),
    }
}

/// A connection together with the generation it belongs to.
#[derive(Debug)]
pub struct Lease<T> {
    generation: u64,
    connection: T,
}

impl<T> Lease<T> {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn connection(&self) -> &T {
        &self.connection
    }
}

pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    current: ArcSwap<Lease<C::Connection>>,
    rebuild_lock: Mutex<()>,
    rebuilds: AtomicU64,
}

impl<C: Connector> ConnectionSupervisor<C> {
    /// Builds the first connection. Failure here is a construction error.
    pub async fn connect(connector: C) -> CacheResult<Self> {
        let connection = connect_within(&connector).await?;
        info!(target_addr = %connector.describe(), "shared cache connection established");
        Ok(Self {
            connector,
            current: ArcSwap::from_pointee(Lease {
                generation: 0,
                connection,
            }),
            rebuild_lock: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
        })
    }

    /// Current connection (single atomic load, never blocks).
    #[inline]
    pub fn current(&self) -> Arc<Lease<C::Connection>> {
        self.current.load_full()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Number of successful rebuilds since construction.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Feeds an operation outcome to the supervisor and hands it back; fatal errors
    /// trigger a rebuild first.
    pub async fn observe<T, E>(
        &self,
        generation: u64,
        outcome: Result<T, E>,
        is_fatal: impl FnOnce(&E) -> bool,
    ) -> Result<T, E> {
        let fatal = match &outcome {
            Err(err) => is_fatal(err),
            Ok(_) => false,
        };
        if fatal {
            self.report_fault(generation).await;
        }
        outcome
    }

    /// Rebuilds the connection if `generation` is still the live one.
    ///
    /// Returns `true` if this call performed the swap. Rebuild failures (timeouts included)
    /// are logged, not returned: the caller's operation already failed, and the next fault
    /// report against the same generation will try again. Concurrent reporters wait at most
    /// one connect timeout for the rebuild lock.
    #[instrument(skip(self), fields(target_addr = %self.connector.describe()))]
    pub async fn report_fault(&self, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }

        let _guard = self.rebuild_lock.lock().await;

        // Another caller may have rebuilt while we waited for the lock.
        if self.generation() != generation {
            return false;
        }

        warn!(generation, "shared cache connection unusable, rebuilding");

        match connect_within(&self.connector).await {
            Ok(connection) => {
                let next = generation + 1;
                self.current.store(Arc::new(Lease {
                    generation: next,
                    connection,
                }));
                self.rebuilds.fetch_add(1, Ordering::AcqRel);
                info!(generation = next, "shared cache connection rebuilt");
                true
            }
            Err(e) => {
                error!(generation, error = %e, "failed to rebuild shared cache connection");
                false
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionSupervisor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("target", &self.connector.describe())
            .field("generation", &self.generation())
            .field("rebuilds", &self.rebuild_count())
            .finish()
    }
}
