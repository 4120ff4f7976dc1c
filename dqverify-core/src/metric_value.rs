//! Resolved metric values.
//!
//! Most metrics resolve to plain JSON. Map conditions resolve to a
//! backend-native description of the unexpected rows, which the rest of the
//! map family consumes without going back through JSON.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricId;
use crate::{ExpectationsError, Result};

/// Resolved metrics keyed by identity.
pub type MetricValues = HashMap<MetricId, MetricValue>;

/// A map condition together with the domain it was evaluated on.
#[derive(Debug, Clone, PartialEq)]
pub struct UnexpectedCondition<C> {
    /// Backend-native description of the unexpected rows
    pub condition: C,
    /// Row-selection kwargs, including any null filter added by the provider
    pub compute_kwargs: Kwargs,
    /// Column-selection kwargs
    pub accessor_kwargs: Kwargs,
}

/// Unexpected rows of an in-memory table, as positions in the loaded batch.
pub type RowIndexCondition = UnexpectedCondition<Vec<usize>>;

/// Unexpected rows of a SQL batch, as a boolean SQL expression.
#[cfg(feature = "sqlite")]
pub type SqlCondition = UnexpectedCondition<String>;

/// Unexpected rows of a dataframe batch, as a boolean expression.
#[cfg(feature = "polars")]
pub type FrameCondition = UnexpectedCondition<polars::prelude::Expr>;

/// A resolved metric.
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// Plain value
    Json(Value),
    /// Map condition on the table engine
    RowIndex(RowIndexCondition),
    /// Map condition on the SQL engine
    #[cfg(feature = "sqlite")]
    Sql(SqlCondition),
    /// Map condition on the dataframe engine
    #[cfg(feature = "polars")]
    Frame(FrameCondition),
}

impl MetricValue {
    /// Wraps a JSON value.
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(value.into())
    }

    /// Returns the JSON value, if this is a plain value.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the JSON value or an error naming the metric.
    pub fn expect_json(&self, metric_name: &str) -> Result<&Value> {
        self.as_json().ok_or_else(|| {
            ExpectationsError::provider_message(
                metric_name,
                "expected a plain value, found a map condition",
            )
        })
    }

    /// Converts to a JSON value. Conditions render as their kwargs.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::RowIndex(c) => serde_json::json!({
                "unexpected_rows": c.condition,
                "compute_kwargs": c.compute_kwargs.to_json(),
                "accessor_kwargs": c.accessor_kwargs.to_json(),
            }),
            #[cfg(feature = "sqlite")]
            Self::Sql(c) => serde_json::json!({
                "condition": c.condition,
                "compute_kwargs": c.compute_kwargs.to_json(),
                "accessor_kwargs": c.accessor_kwargs.to_json(),
            }),
            #[cfg(feature = "polars")]
            Self::Frame(c) => serde_json::json!({
                "condition": format!("{:?}", c.condition),
                "compute_kwargs": c.compute_kwargs.to_json(),
                "accessor_kwargs": c.accessor_kwargs.to_json(),
            }),
        }
    }

    /// Reads a count (non-negative integer).
    pub fn as_count(&self) -> Option<u64> {
        self.as_json().and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        })
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Total order over JSON values used for sorting reported values.
///
/// Nulls sort first, then booleans, numbers (numerically), strings, arrays
/// and objects.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ordering = compare_json(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            Value::Object(x.clone()).to_string().cmp(&Value::Object(y.clone()).to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Returns true if the value counts as missing.
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(n) => n.as_f64().is_some_and(f64::is_nan),
        _ => false,
    }
}

/// Converts an f64 to JSON, mapping non-finite values to null.
pub fn f64_to_json(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Truncates a list to `limit` entries when a limit is set.
pub fn truncate<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// Builds `[{value, count}]` sorted by descending count, then by value.
pub fn sorted_value_counts(counts: Vec<(Value, u64)>, limit: Option<usize>) -> Value {
    let mut counts = counts;
    counts.sort_by(|(va, ca), (vb, cb)| cb.cmp(ca).then_with(|| compare_json(va, vb)));
    Value::Array(
        truncate(counts, limit)
            .into_iter()
            .map(|(value, count)| serde_json::json!({"value": value, "count": count}))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_json_orders_types_then_values() {
        let mut values = vec![json!("b"), json!(2), json!(null), json!(1.5), json!("a"), json!(true)];
        values.sort_by(compare_json);
        assert_eq!(
            values,
            vec![json!(null), json!(true), json!(1.5), json!(2), json!("a"), json!("b")]
        );
    }

    #[test]
    fn test_sorted_value_counts() {
        let counts = vec![(json!("x"), 1), (json!("b"), 3), (json!("a"), 3)];
        let sorted = sorted_value_counts(counts, Some(2));
        assert_eq!(
            sorted,
            json!([{"value": "a", "count": 3}, {"value": "b", "count": 3}])
        );
    }

    #[test]
    fn test_as_count() {
        assert_eq!(MetricValue::json(3).as_count(), Some(3));
        assert_eq!(MetricValue::json(3.0).as_count(), Some(3));
        assert_eq!(MetricValue::json(-1).as_count(), None);
        assert_eq!(MetricValue::json("3").as_count(), None);
    }

    #[test]
    fn test_is_missing() {
        assert!(is_missing(&Value::Null));
        assert!(!is_missing(&json!(0)));
        assert!(!is_missing(&json!("")));
    }
}
