//! Per-consumer adapter over the shared manager.
//!
//! A [`FeedSubscription`] is what a single consumer holds. It registers one
//! stable wrapper listener per activation and forwards every notification to
//! whatever callback is currently bound, so rebinding never touches the
//! manager.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use livefeed_proto::FeedKey;

use crate::error::SubscriptionError;
use crate::listener::{Callback, Listener};
use crate::manager::RealtimeManager;
use crate::transport::Transport;

/// Observable state of a consumer's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not activated.
    Inactive,
    /// Waiting for the feed to connect.
    Connecting,
    /// The feed connected.
    Live,
    /// The feed could not be established. Consumers may fall back to polling.
    Failed(SubscriptionError),
}

struct Activation {
    key: FeedKey,
    wrapper: Listener,
    /// Session generation the wrapper joined; `None` when refused.
    generation: Option<u64>,
    watcher: Option<JoinHandle<()>>,
}

/// A consumer's handle on one live feed.
///
/// Dropping the subscription deactivates it.
pub struct FeedSubscription<T: Transport> {
    manager: Arc<RealtimeManager<T>>,
    callback: Arc<RwLock<Arc<Callback>>>,
    active: Option<Activation>,
    status: Arc<watch::Sender<FeedStatus>>,
    activation_id: Arc<AtomicU64>,
}

impl<T: Transport> FeedSubscription<T> {
    /// Create an inactive subscription.
    pub fn new(manager: Arc<RealtimeManager<T>>) -> Self {
        let (status, _) = watch::channel(FeedStatus::Inactive);
        let noop: Arc<Callback> = Arc::new(|| {});
        Self {
            manager,
            callback: Arc::new(RwLock::new(noop)),
            active: None,
            status: Arc::new(status),
            activation_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start following `key`, invoking `on_update` on every change.
    ///
    /// Activating again with an identical key only rebinds the callback,
    /// unless the previous activation failed, in which case the feed is
    /// requested again. A different key releases the previous feed first.
    /// Must be called from within a tokio runtime.
    pub fn activate(&mut self, key: FeedKey, on_update: impl Fn() + Send + Sync + 'static) {
        self.set_callback(on_update);

        let failed = matches!(*self.status.borrow(), FeedStatus::Failed(_));
        if !failed && self.active.as_ref().is_some_and(|a| a.key == key) {
            return;
        }
        self.deactivate();

        let wrapper = {
            let cell = Arc::clone(&self.callback);
            Listener::new(move || {
                let current = Arc::clone(&*cell.read());
                current();
            })
        };

        let id = self.activation_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (generation, watcher) = match self.manager.register(key.clone(), wrapper.clone()) {
            Ok(registration) => {
                let connect = registration.connect;
                self.status.send_replace(FeedStatus::Connecting);
                let status = Arc::clone(&self.status);
                let current = Arc::clone(&self.activation_id);
                let feed = key.name.clone();
                let watcher = tokio::spawn(async move {
                    let next = match connect.await {
                        Ok(()) => FeedStatus::Live,
                        Err(e) => {
                            warn!(feed = %feed, error = %e, "live feed unavailable");
                            FeedStatus::Failed(e)
                        }
                    };
                    if current.load(Ordering::SeqCst) == id {
                        status.send_replace(next);
                    }
                });
                (Some(registration.generation), Some(watcher))
            }
            Err(e) => {
                warn!(feed = %key.name, error = %e, "live feed unavailable");
                self.status.send_replace(FeedStatus::Failed(e));
                (None, None)
            }
        };

        debug!(feed = %key.name, generation, "feed subscription activated");
        self.active = Some(Activation {
            key,
            wrapper,
            generation,
            watcher,
        });
    }

    /// Replace the callback without resubscribing.
    pub fn set_callback(&self, on_update: impl Fn() + Send + Sync + 'static) {
        *self.callback.write() = Arc::new(on_update);
    }

    /// Release the current feed. Safe to call while still connecting and
    /// when not active.
    pub fn deactivate(&mut self) {
        let Some(activation) = self.active.take() else {
            return;
        };

        self.activation_id.fetch_add(1, Ordering::SeqCst);
        if let Some(watcher) = activation.watcher {
            watcher.abort();
        }
        if let Some(generation) = activation.generation {
            self.manager
                .unregister(&activation.key.name, generation, &activation.wrapper);
        }
        self.status.send_replace(FeedStatus::Inactive);
        debug!(feed = %activation.key.name, "feed subscription deactivated");
    }

    /// Current status.
    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    /// The key of the active feed.
    pub fn key(&self) -> Option<&FeedKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    /// Whether a feed is currently requested.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The shared manager this subscription registers with.
    pub fn manager(&self) -> &Arc<RealtimeManager<T>> {
        &self.manager
    }
}

impl<T: Transport> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl<T: Transport> fmt::Debug for FeedSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("key", &self.key())
            .field("status", &self.status())
            .finish()
    }
}
