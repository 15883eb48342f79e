//! Generic resource engine over a descriptor.

mod engine;
mod error;

pub use engine::ResourceEngine;
pub use error::{EngineError, EngineResult, ErrorKind};

use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Row identifier: one value, or one value per primary key in key order.
#[derive(Debug, Clone, PartialEq)]
pub enum RowId {
    Scalar(Value),
    Composite(Vec<Value>),
}

impl RowId {
    /// Matches `self` positionally against `keys`.
    ///
    /// A single key accepts a scalar or a one-element sequence; N keys
    /// require exactly N values. Any other shape is a caller contract
    /// violation, not an absent row.
    pub fn resolve<'k>(&self, keys: &'k [String]) -> EngineResult<Vec<(&'k str, Value)>> {
        match (keys, self) {
            ([key], Self::Scalar(value)) => Ok(vec![(key.as_str(), value.clone())]),
            (keys, Self::Composite(values)) if keys.len() == values.len() => Ok(keys
                .iter()
                .map(String::as_str)
                .zip(values.iter().cloned())
                .collect()),
            (keys, rid) => Err(EngineError::critical(format!(
                "primary key length not match! require: {}, input: {}",
                keys.len(),
                rid.len()
            ))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Composite(values) => values.len(),
        }
    }
}

impl Display for RowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(Value::String(text)) => f.write_str(text),
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Composite(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|value| match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<Value> for RowId {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Self::Composite(values),
            scalar => Self::Scalar(scalar),
        }
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self::Scalar(Value::String(value))
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        Self::Scalar(Value::from(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for RowId {
    fn from(values: Vec<T>) -> Self {
        Self::Composite(values.into_iter().map(Into::into).collect())
    }
}
