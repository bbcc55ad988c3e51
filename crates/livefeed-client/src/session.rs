//! Per-feed session records and diagnostic snapshots.

use std::collections::HashSet;

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use livefeed_proto::FeedKey;

use crate::error::SubscriptionError;
use crate::listener::Listener;

/// Connection state of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// A connect attempt is in flight; nothing is dispatched.
    Connecting,
    /// The transport confirmed the subscription.
    Connected,
    /// The transport failed after connecting, or a reconnect gave up.
    Failed,
    /// The old transport handle is being released before reconnecting.
    Closing,
}

/// Outcome of a connect procedure, shared by every caller waiting on it.
pub(crate) type ConnectFuture = Shared<BoxFuture<'static, Result<(), SubscriptionError>>>;

/// Mutable record of one feed, owned by the manager's session table.
pub(crate) struct FeedSession<H> {
    pub key: FeedKey,
    pub generation: u64,
    pub handle: Option<H>,
    pub listeners: HashSet<Listener>,
    pub ref_count: usize,
    pub state: SessionState,
    pub pending: Option<ConnectFuture>,
    pub pump: Option<JoinHandle<()>>,
    /// Bumped each time `ref_count` drops to zero; a scheduled cleanup only
    /// proceeds if the epoch it captured is still current.
    pub idle_epoch: u64,
    pub created_at: Instant,
}

impl<H> FeedSession<H> {
    pub fn new(key: FeedKey, generation: u64) -> Self {
        Self {
            key,
            generation,
            handle: None,
            listeners: HashSet::new(),
            ref_count: 0,
            state: SessionState::Connecting,
            pending: None,
            pump: None,
            idle_epoch: 0,
            created_at: Instant::now(),
        }
    }

    pub fn listener_list(&self) -> Vec<Listener> {
        self.listeners.iter().cloned().collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.key.name.clone(),
            source: self.key.describe_source(),
            state: self.state,
            ref_count: self.ref_count,
            listener_count: self.listeners.len(),
            generation: self.generation,
            age_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub source: String,
    pub state: SessionState,
    pub ref_count: usize,
    pub listener_count: usize,
    pub generation: u64,
    pub age_ms: u64,
}

/// Snapshot of the whole session table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub session_count: usize,
    /// Sorted session names.
    pub session_names: Vec<String>,
}
