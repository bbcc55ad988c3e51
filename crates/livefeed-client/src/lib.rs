//! livefeed client - shared, reference-counted live change feeds.
//!
//! Many consumers can follow the same filtered change feed while the process
//! keeps a single transport subscription open for it. The manager retries
//! failed connects with backoff, fans changes out to every listener, and
//! closes feeds shortly after their last consumer leaves.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use livefeed_client::{FeedSubscription, ManagerConfig, MemoryTransport, RealtimeManager};
//! use livefeed_client::proto::FeedKey;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let manager = RealtimeManager::new(transport, ManagerConfig::default());
//!
//!     let mut orders = FeedSubscription::new(manager.clone());
//!     orders.activate(
//!         FeedKey::new("orders-42", "orders").with_filter("customer_id=eq.42"),
//!         || println!("orders changed, refetching"),
//!     );
//!
//!     println!("{:?}", manager.stats());
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
pub mod session;
pub mod signals;
pub mod transport;

pub use adapter::{FeedStatus, FeedSubscription};
pub use config::ManagerConfig;
pub use error::{CallbackError, CleanupError, ConnectError, SubscriptionError};
pub use listener::{Callback, Listener};
pub use manager::{RealtimeManager, Registration, SubscribeFuture};
pub use session::{ManagerStats, SessionInfo, SessionState};
pub use signals::{ProcessSignal, SignalHub};
pub use transport::{
    feed_channel, FeedSink, FeedSource, MemoryHandle, MemoryTransport, OpenBehavior, Transport,
};

/// Re-export protocol types.
pub use livefeed_proto as proto;
