//! Client error types.

use std::time::Duration;

use thiserror::Error;

/// A single connect attempt failed. Retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The transport refused to open the subscription.
    #[error("transport rejected subscription: {0}")]
    Rejected(String),

    /// The backend reported an error while subscribing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend reported that subscribing timed out.
    #[error("transport reported a subscribe timeout")]
    TimedOut,

    /// No confirmation arrived before the attempt deadline.
    #[error("no confirmation within {0:?}")]
    Deadline(Duration),

    /// The subscription closed before it was confirmed.
    #[error("subscription closed before it was confirmed")]
    Closed,
}

/// A feed could not be established. The only error surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Every connect attempt failed.
    #[error("feed `{feed}` failed after {attempts} attempts: {last}")]
    Exhausted {
        feed: String,
        attempts: u32,
        last: ConnectError,
    },

    /// The name is already in use for a different source.
    #[error("feed `{feed}` is open for {existing}, refusing {requested}")]
    KeyMismatch {
        feed: String,
        existing: String,
        requested: String,
    },

    /// The connect task ended without an outcome (manager shut down or task panicked).
    #[error("connect for feed `{feed}` was aborted")]
    Aborted { feed: String },
}

impl SubscriptionError {
    /// Name of the feed the error relates to.
    pub fn feed(&self) -> &str {
        match self {
            SubscriptionError::Exhausted { feed, .. }
            | SubscriptionError::KeyMismatch { feed, .. }
            | SubscriptionError::Aborted { feed } => feed,
        }
    }
}

/// A listener panicked during dispatch. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener for feed `{feed}` panicked: {message}")]
pub struct CallbackError {
    pub feed: String,
    pub message: String,
}

/// Closing a transport subscription failed. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cleanup failed: {0}")]
pub struct CleanupError(pub String);
