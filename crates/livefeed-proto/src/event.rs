//! Change events and transport status signals.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Concrete kind of a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// A single row change delivered by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub table: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// New row contents; `Null` for deletes.
    pub record: Value,
    /// Previous row contents, when the backend reports them.
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    /// Create an insert event.
    pub fn insert(table: impl Into<String>, record: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            record,
            old_record: None,
        }
    }

    /// Create an update event.
    pub fn update(table: impl Into<String>, record: Value, old_record: Option<Value>) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            record,
            old_record,
        }
    }

    /// Create a delete event.
    pub fn delete(table: impl Into<String>, old_record: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record: Some(old_record),
        }
    }

    /// Row used for filter evaluation: the new row, or the old one for deletes.
    pub fn filter_row(&self) -> &Value {
        match (&self.kind, &self.old_record) {
            (ChangeKind::Delete, Some(old)) => old,
            _ => &self.record,
        }
    }
}

/// Lifecycle status reported by a transport for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    /// Subscription request sent, not yet confirmed.
    Connecting,
    /// Subscription is live.
    Connected,
    /// Backend reported an error.
    Error(String),
    /// Backend did not confirm in time.
    TimedOut,
    /// Subscription was closed.
    Closed,
}

impl TransportStatus {
    /// Check whether this status ends a connect attempt unsuccessfully.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TransportStatus::Error(_) | TransportStatus::TimedOut | TransportStatus::Closed
        )
    }
}

/// Everything a transport can push for an open subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// Lifecycle status change.
    Status(TransportStatus),
    /// Matching row change.
    Change(ChangeEvent),
}
