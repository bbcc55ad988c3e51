//! Process-wide connectivity and visibility signals.

use tokio::sync::broadcast;

/// Default number of signals buffered per receiver.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 16;

/// An event from the host process that affects every feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSignal {
    /// Connectivity returned; every feed is reopened.
    NetworkOnline,
    /// Connectivity was lost.
    NetworkOffline,
    /// The host became visible again; connected feeds are refreshed.
    Visible,
    /// The host was hidden.
    Hidden,
}

/// Broadcast hub the embedding process emits [`ProcessSignal`]s into.
///
/// Cloning the hub shares the same channel.
#[derive(Debug, Clone)]
pub struct SignalHub {
    sender: broadcast::Sender<ProcessSignal>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessSignal> {
        self.sender.subscribe()
    }

    /// Emit a signal. Returns the number of receivers reached; zero when no
    /// one is listening.
    pub fn emit(&self, signal: ProcessSignal) -> usize {
        let reached = self.sender.send(signal).unwrap_or(0);
        tracing::debug!(?signal, reached, "process signal emitted");
        reached
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}
