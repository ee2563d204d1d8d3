//! Update subscriptions: an explicit handle around a receiver task and a dispatcher task.
//!
//! The receiver pushes invalidation events into a bounded channel; the dispatcher runs the
//! callback. A full channel means an event for the key is already pending, so the new one
//! is coalesced instead of blocking the receiver.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::{CacheError, CacheResult};
use crate::constants::{SUBSCRIPTION_BUFFER, SUBSCRIPTION_ERROR_BUFFER};

/// Invoked once per observed invalidation of the subscribed key.
pub type UpdateCallback = Arc<dyn Fn() -> CacheResult<()> + Send + Sync>;

/// Wraps a closure as an [`UpdateCallback`].
pub fn update_callback<F>(f: F) -> UpdateCallback
where
    F: Fn() -> CacheResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A callback failure, forwarded to the subscription's error channel.
#[derive(Debug)]
pub struct SubscriptionError {
    pub key: String,
    pub error: CacheError,
}

/// Producer side handed to a receiver task.
#[derive(Debug, Clone)]
pub struct EventSink {
    key: Arc<str>,
    tx: mpsc::Sender<()>,
}

impl EventSink {
    /// Queues one invalidation. Returns `false` once the dispatcher is gone.
    pub fn deliver(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                trace!(key = %self.key, "invalidation coalesced with pending event");
                true
            }
            Err(TrySendError::Closed(())) => false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Handle to a live `on_updated` registration.
///
/// [`Subscription::cancel`] returns only after the background tasks have stopped, so no
/// callback runs afterwards. Dropping the handle also tears the subscription down.
pub struct Subscription {
    key: String,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    errors: mpsc::Receiver<SubscriptionError>,
}

impl Subscription {
    /// Spawns the dispatcher and the receiver produced by `receiver`.
    ///
    /// The subscription's token is a child of `parent`: cancelling `parent` stops it too.
    pub fn spawn<F, Fut>(
        key: impl Into<String>,
        parent: &CancellationToken,
        callback: UpdateCallback,
        receiver: F,
    ) -> Self
    where
        F: FnOnce(EventSink, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let token = parent.child_token();
        let (event_tx, event_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (error_tx, error_rx) = mpsc::channel(SUBSCRIPTION_ERROR_BUFFER);

        let sink = EventSink {
            key: Arc::from(key.as_str()),
            tx: event_tx,
        };

        let dispatcher = tokio::spawn(dispatch(
            key.clone(),
            token.clone(),
            event_rx,
            callback,
            error_tx,
        ));

        let receive = receiver(sink, token.clone());
        let receive_token = token.clone();
        let receiver = tokio::spawn(async move {
            tokio::select! {
                _ = receive_token.cancelled() => {}
                _ = receive => {}
            }
        });

        debug!(key = %key, "subscription started");

        Self {
            key,
            token,
            tasks: vec![receiver, dispatcher],
            errors: error_rx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Callback failures not yet consumed.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<SubscriptionError> {
        &mut self.errors
    }

    /// Stops the subscription and waits for its tasks to finish.
    pub async fn cancel(mut self) {
        self.token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        debug!(key = %self.key, "subscription cancelled");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

async fn dispatch(
    key: String,
    token: CancellationToken,
    mut events: mpsc::Receiver<()>,
    callback: UpdateCallback,
    errors: mpsc::Sender<SubscriptionError>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => {
                if event.is_none() {
                    break;
                }
                if let Err(error) = callback() {
                    warn!(key = %key, error = %error, "update callback failed");
                    let failure = SubscriptionError { key: key.clone(), error };
                    if errors.try_send(failure).is_err() {
                        debug!(key = %key, "subscription error channel full, failure only logged");
                    }
                }
            }
        }
    }
}
