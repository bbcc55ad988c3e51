//! livefeed protocol types.
//!
//! Plain data shared by transports, the session manager, and tooling.
//!
//! # Modules
//!
//! - [`feed`] - Feed keys and event-type selectors
//! - [`filter`] - Row filters in `column=op.value` form
//! - [`event`] - Change events and transport status signals
//! - [`error`] - Parse errors

pub mod error;
pub mod event;
pub mod feed;
pub mod filter;

pub use error::Error;

pub use event::{ChangeEvent, ChangeKind, FeedSignal, TransportStatus};
pub use feed::{EventType, FeedKey};
pub use filter::{FeedFilter, FilterOp};
