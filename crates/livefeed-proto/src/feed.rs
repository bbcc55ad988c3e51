//! Feed identity: the name callers share plus the source it is opened against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::event::ChangeKind;
use crate::filter::FeedFilter;

/// Which row changes a feed is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventType {
    /// Row inserts.
    Insert,
    /// Row updates.
    Update,
    /// Row deletes.
    Delete,
    /// Every kind of change.
    #[default]
    Any,
}

impl EventType {
    /// Wire form used by change-feed backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "INSERT",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
            EventType::Any => "*",
        }
    }

    /// Check whether a concrete change kind is selected.
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventType::Any, _)
                | (EventType::Insert, ChangeKind::Insert)
                | (EventType::Update, ChangeKind::Update)
                | (EventType::Delete, ChangeKind::Delete)
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(EventType::Insert),
            "UPDATE" => Ok(EventType::Update),
            "DELETE" => Ok(EventType::Delete),
            "*" | "ANY" => Ok(EventType::Any),
            _ => Err(Error::UnknownEventType(s.to_string())),
        }
    }
}

/// Identifies one live feed.
///
/// `name` is the deduplication key: every caller using the same name is
/// assumed to want the same `(table, filter, event_type)` source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedKey {
    /// Caller-chosen name, unique per logical feed.
    pub name: String,
    /// Table the feed watches.
    pub table: String,
    /// Optional row filter in `column=op.value` form.
    pub filter: Option<String>,
    /// Change kinds to receive.
    pub event_type: EventType,
}

impl FeedKey {
    /// Create a key watching every change on `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            filter: None,
            event_type: EventType::Any,
        }
    }

    /// Restrict the feed to rows matching a filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restrict the feed to one change kind.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Check whether two keys open the same underlying source.
    ///
    /// Names are not compared.
    pub fn same_source(&self, other: &FeedKey) -> bool {
        self.table == other.table
            && self.filter == other.filter
            && self.event_type == other.event_type
    }

    /// Parse the filter expression, if any.
    pub fn parsed_filter(&self) -> Result<Option<FeedFilter>, Error> {
        self.filter.as_deref().map(FeedFilter::parse).transpose()
    }

    /// Human-readable source description, used in logs and errors.
    pub fn describe_source(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{} [{}] on {}", self.table, filter, self.event_type),
            None => format!("{} on {}", self.table, self.event_type),
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.describe_source())
    }
}
