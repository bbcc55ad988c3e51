//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing feed descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Filter expression is not of the form `column=op.value`.
    #[error("invalid filter expression `{0}`")]
    InvalidFilter(String),

    /// Filter operator is not supported.
    #[error("unknown filter operator `{operator}` in `{expression}`")]
    UnknownOperator { operator: String, expression: String },

    /// Event type selector is not one of INSERT, UPDATE, DELETE or `*`.
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
}
