//! Listener identity and isolated invocation.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::CallbackError;

/// A zero-argument change notification callback.
pub type Callback = dyn Fn() + Send + Sync;

/// A registered listener.
///
/// Equality and hashing use pointer identity, so a clone of a listener is the
/// same listener while two listeners built from identical closures are not.
#[derive(Clone)]
pub struct Listener(Arc<Callback>);

impl Listener {
    /// Wrap a closure as a new listener.
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Wrap an already shared callback. Identity follows the `Arc`.
    pub fn from_arc(callback: Arc<Callback>) -> Self {
        Self(callback)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Invoke the callback, converting a panic into a [`CallbackError`].
    pub(crate) fn invoke(&self, feed: &str) -> Result<(), CallbackError> {
        catch_unwind(AssertUnwindSafe(|| (self.0)())).map_err(|payload| CallbackError {
            feed: feed.to_string(),
            message: panic_message(payload.as_ref()),
        })
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl Hash for Listener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:#x})", self.addr())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Invoke every listener once. A failing listener does not stop the others.
///
/// Returns the number of listeners that panicked.
pub(crate) fn notify_all(feed: &str, listeners: &[Listener]) -> usize {
    let mut failures = 0;
    for listener in listeners {
        if let Err(e) = listener.invoke(feed) {
            failures += 1;
            tracing::warn!(feed, error = %e, "listener failed during dispatch");
        }
    }
    failures
}
