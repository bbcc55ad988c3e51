//! In-process transport for tests, demos, and embedding.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use livefeed_proto::{ChangeEvent, FeedFilter, FeedKey, FeedSignal, TransportStatus};

use super::{feed_channel, FeedSink, Transport};
use crate::error::{CleanupError, ConnectError};

/// What the memory transport does when a subscription is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Confirm the subscription immediately.
    #[default]
    Connect,
    /// Report a backend error.
    Fail(String),
    /// Report a backend timeout.
    TimeOut,
    /// Report that the subscription closed.
    Close,
    /// Never report anything; the caller has to signal manually.
    Hang,
    /// Refuse to open at all.
    Reject(String),
}

/// Handle to a subscription opened on a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    id: u64,
    name: String,
}

impl MemoryHandle {
    /// Name the subscription was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct MemoryChannel {
    id: u64,
    key: FeedKey,
    filter: Option<FeedFilter>,
    sink: FeedSink,
}

impl MemoryChannel {
    fn accepts(&self, event: &ChangeEvent) -> bool {
        self.key.table == event.table
            && self.key.event_type.matches(event.kind)
            && self
                .filter
                .as_ref()
                .map_or(true, |f| f.matches(event.filter_row()))
    }
}

#[derive(Default)]
struct MemoryState {
    channels: HashMap<String, MemoryChannel>,
    plans: HashMap<String, VecDeque<OpenBehavior>>,
    default_behavior: OpenBehavior,
    opens: Vec<(String, Instant)>,
    closes: HashMap<String, usize>,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A transport that keeps subscriptions in memory.
///
/// Open outcomes can be scripted per feed name with [`plan`](Self::plan);
/// otherwise the default behavior applies. Like hosted backends, opening a
/// second subscription under a name that is still open is refused.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    /// Create a transport that confirms every subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with a different default open behavior.
    pub fn with_default(behavior: OpenBehavior) -> Self {
        let transport = Self::default();
        transport.state.lock().default_behavior = behavior;
        transport
    }

    /// Queue open outcomes for a feed name, consumed one per open.
    pub fn plan(&self, name: &str, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.state
            .lock()
            .plans
            .entry(name.to_string())
            .or_default()
            .extend(behaviors);
    }

    /// Register a subscription nobody holds a handle for.
    pub fn inject_orphan(&self, key: FeedKey) {
        let (sink, _source) = feed_channel();
        let mut state = self.state.lock();
        let id = state.next_id();
        let filter = key.parsed_filter().ok().flatten();
        state.channels.insert(
            key.name.clone(),
            MemoryChannel {
                id,
                key,
                filter,
                sink,
            },
        );
    }

    /// Push a status signal to an open subscription.
    pub fn signal(&self, name: &str, status: TransportStatus) -> bool {
        self.send(name, FeedSignal::Status(status))
    }

    /// Push a change directly to an open subscription, bypassing routing.
    pub fn emit(&self, name: &str, event: ChangeEvent) -> bool {
        self.send(name, FeedSignal::Change(event))
    }

    fn send(&self, name: &str, signal: FeedSignal) -> bool {
        let state = self.state.lock();
        state
            .channels
            .get(name)
            .map(|channel| channel.sink.send(signal).is_ok())
            .unwrap_or(false)
    }

    /// Route a change to every subscription whose table, event type and
    /// filter accept it. Returns the number of subscriptions reached.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let state = self.state.lock();
        state
            .channels
            .values()
            .filter(|channel| channel.accepts(&event))
            .filter(|channel| {
                channel
                    .sink
                    .send(FeedSignal::Change(event.clone()))
                    .is_ok()
            })
            .count()
    }

    /// Number of open calls made for a name.
    pub fn open_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    /// Number of open calls made in total.
    pub fn total_opens(&self) -> usize {
        self.state.lock().opens.len()
    }

    /// When each open call for a name was made, oldest first.
    pub fn open_times(&self, name: &str) -> Vec<Instant> {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Number of close calls that actually closed a subscription for a name.
    pub fn close_count(&self, name: &str) -> usize {
        self.state.lock().closes.get(name).copied().unwrap_or(0)
    }

    /// Check whether a subscription is currently open under a name.
    pub fn is_open(&self, name: &str) -> bool {
        self.state.lock().channels.contains_key(name)
    }

    /// Names of all open subscriptions, sorted.
    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Handle = MemoryHandle;

    async fn open(&self, key: &FeedKey, sink: FeedSink) -> Result<MemoryHandle, ConnectError> {
        let mut state = self.state.lock();
        state.opens.push((key.name.clone(), Instant::now()));

        if state.channels.contains_key(&key.name) {
            return Err(ConnectError::Rejected(format!(
                "a subscription named `{}` already exists",
                key.name
            )));
        }

        let filter = key
            .parsed_filter()
            .map_err(|e| ConnectError::Rejected(e.to_string()))?;

        let default_behavior = state.default_behavior.clone();
        let behavior = state
            .plans
            .get_mut(&key.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(default_behavior);

        if let OpenBehavior::Reject(reason) = &behavior {
            return Err(ConnectError::Rejected(reason.clone()));
        }

        let id = state.next_id();
        let _ = sink.send(FeedSignal::Status(TransportStatus::Connecting));
        let outcome = match behavior {
            OpenBehavior::Connect => Some(TransportStatus::Connected),
            OpenBehavior::Fail(message) => Some(TransportStatus::Error(message)),
            OpenBehavior::TimeOut => Some(TransportStatus::TimedOut),
            OpenBehavior::Close => Some(TransportStatus::Closed),
            OpenBehavior::Hang | OpenBehavior::Reject(_) => None,
        };
        if let Some(status) = outcome {
            let _ = sink.send(FeedSignal::Status(status));
        }

        state.channels.insert(
            key.name.clone(),
            MemoryChannel {
                id,
                key: key.clone(),
                filter,
                sink,
            },
        );

        Ok(MemoryHandle {
            id,
            name: key.name.clone(),
        })
    }

    async fn close(&self, handle: MemoryHandle) -> Result<(), CleanupError> {
        let mut state = self.state.lock();
        let owned = state
            .channels
            .get(&handle.name)
            .is_some_and(|channel| channel.id == handle.id);
        if owned {
            state.channels.remove(&handle.name);
            *state.closes.entry(handle.name).or_default() += 1;
        }
        Ok(())
    }

    async fn find_existing(&self, name: &str) -> Option<MemoryHandle> {
        let state = self.state.lock();
        state.channels.get(name).map(|channel| MemoryHandle {
            id: channel.id,
            name: name.to_string(),
        })
    }
}
