//! Change-feed transport capability.
//!
//! A transport opens named, filtered subscriptions against a backend and
//! pushes [`FeedSignal`]s for each one. The manager never looks inside a
//! transport handle; it only hands it back to [`Transport::close`].
//!
//! Backends whose status vocabulary differs (broker topics, WAL tailers)
//! map their signals onto [`TransportStatus`](livefeed_proto::TransportStatus):
//! a confirmation becomes `Connected`, any failure `Error` or `TimedOut`, and
//! teardown `Closed`.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use livefeed_proto::{FeedKey, FeedSignal};

use crate::error::{CleanupError, ConnectError};

pub use memory::{MemoryHandle, MemoryTransport, OpenBehavior};

/// Sending half given to a transport for one subscription.
pub type FeedSink = mpsc::UnboundedSender<FeedSignal>;

/// Receiving half kept by the manager.
pub type FeedSource = mpsc::UnboundedReceiver<FeedSignal>;

/// Create a signal channel for one subscription.
pub fn feed_channel() -> (FeedSink, FeedSource) {
    mpsc::unbounded_channel()
}

/// A change-feed backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Handle to one open subscription.
    type Handle: Send + 'static;

    /// Open a subscription named `key.name`.
    ///
    /// Status changes and matching row changes are pushed into `sink`.
    /// Returning `Ok` does not mean the subscription is live; that is
    /// signalled with `TransportStatus::Connected`.
    async fn open(&self, key: &FeedKey, sink: FeedSink) -> Result<Self::Handle, ConnectError>;

    /// Close a subscription. Must tolerate handles that are already closed.
    async fn close(&self, handle: Self::Handle) -> Result<(), CleanupError>;

    /// Look up a subscription already registered under `name`, such as one
    /// left behind by an earlier process state that was never shut down.
    async fn find_existing(&self, name: &str) -> Option<Self::Handle>;
}
