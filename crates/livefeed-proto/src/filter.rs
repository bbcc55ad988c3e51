//! Row filters in the `column=op.value` form accepted by change-feed backends.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Comparison operator of a [`FeedFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    /// Column equals value.
    Eq,
    /// Column does not equal value.
    Neq,
    /// Column less than value.
    Lt,
    /// Column less than or equal to value.
    Lte,
    /// Column greater than value.
    Gt,
    /// Column greater than or equal to value.
    Gte,
    /// Column is one of a list of values.
    In,
}

impl FilterOp {
    fn parse(operator: &str, expression: &str) -> Result<Self, Error> {
        match operator {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "in" => Ok(FilterOp::In),
            _ => Err(Error::UnknownOperator {
                operator: operator.to_string(),
                expression: expression.to_string(),
            }),
        }
    }

    /// Operator keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::In => "in",
        }
    }
}

/// A single-column row filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Column the filter applies to.
    pub column: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Literal operands. Exactly one unless `op` is `In`.
    pub values: Vec<String>,
}

impl FeedFilter {
    /// Parse an expression such as `customer_id=eq.42` or `status=in.(a,b)`.
    pub fn parse(expression: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidFilter(expression.to_string());

        let (column, rest) = expression.split_once('=').ok_or_else(invalid)?;
        let column = column.trim();
        if column.is_empty() {
            return Err(invalid());
        }

        let (operator, operand) = rest.split_once('.').ok_or_else(invalid)?;
        let op = FilterOp::parse(operator.trim(), expression)?;

        let values = if op == FilterOp::In {
            let list = operand
                .trim()
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(invalid)?;
            list.split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|v| !v.is_empty())
                .collect()
        } else {
            vec![operand.to_string()]
        };

        if values.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }

    /// Evaluate the filter against a JSON row.
    ///
    /// A missing column never matches, and neither does a filter without
    /// operands.
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field) = record.get(&self.column) else {
            return false;
        };
        let Some(operand) = self.values.first() else {
            return false;
        };

        let first = || compare(field, operand);
        match self.op {
            FilterOp::Eq => first() == Some(Ordering::Equal),
            FilterOp::Neq => matches!(first(), Some(o) if o != Ordering::Equal),
            FilterOp::Lt => first() == Some(Ordering::Less),
            FilterOp::Lte => matches!(first(), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt => first() == Some(Ordering::Greater),
            FilterOp::Gte => matches!(first(), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::In => self
                .values
                .iter()
                .any(|v| compare(field, v) == Some(Ordering::Equal)),
        }
    }
}

impl fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            FilterOp::In => write!(f, "{}=in.({})", self.column, self.values.join(",")),
            op => write!(
                f,
                "{}={}.{}",
                self.column,
                op.as_str(),
                self.values.first().map_or("", String::as_str)
            ),
        }
    }
}

/// Compare a JSON field with a literal operand.
///
/// Returns `None` when the two cannot be compared.
fn compare(field: &Value, literal: &str) -> Option<Ordering> {
    match field {
        Value::Null => (literal == "null").then_some(Ordering::Equal),
        Value::Bool(b) => literal.parse::<bool>().ok().map(|rhs| b.cmp(&rhs)),
        Value::Number(n) => {
            let lhs = n.as_f64()?;
            let rhs: f64 = literal.parse().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Value::String(s) => Some(s.as_str().cmp(literal)),
        Value::Array(_) | Value::Object(_) => None,
    }
}
