//! Provider base types.
//!
//! A provider is a static description of one metric: its domain type, the
//! value keys it reads, and up to one backend function per engine. Calling
//! `register` on a provider expands it into registry entries. A map provider
//! expands into a whole family of unexpected-* metrics; an aggregate
//! provider into a bundled partial plus its final value.

pub mod aggregate;
pub mod map;

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::ResultFormatConfig;
use crate::domain::{Domain, MetricDomainType};
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::{ExpectationsError, Result};

/// Dependency name of an aggregate's bundled partial.
pub const METRIC_PARTIAL_FN: &str = "metric_partial_fn";

/// Value key holding the result format.
pub const RESULT_FORMAT_KEY: &str = "result_format";

/// Columns named by the accessor part of domain kwargs.
pub fn accessor_columns(kwargs: &Kwargs, domain_type: MetricDomainType) -> Result<Vec<String>> {
    Ok(Domain::from_kwargs(kwargs, domain_type)?.accessor_columns())
}

/// Maximum list length requested by the value kwargs; `None` for COMPLETE.
pub fn result_limit(value_kwargs: &Kwargs) -> Result<Option<usize>> {
    Ok(ResultFormatConfig::from_value_kwargs(value_kwargs)?.limit())
}

/// Shapes one row's accessor values for reporting.
///
/// Column domains report the bare value, pairs a two-element array, and
/// multicolumn domains an object keyed by column.
pub fn shape_values(domain_type: MetricDomainType, columns: &[String], values: Vec<Value>) -> Value {
    match domain_type {
        MetricDomainType::Column => values.into_iter().next().unwrap_or(Value::Null),
        MetricDomainType::ColumnPair => Value::Array(values),
        _ => Value::Object(
            columns
                .iter()
                .cloned()
                .zip(values)
                .collect::<Map<String, Value>>(),
        ),
    }
}

/// Dependency builder naming a single dependency derived from the
/// configuration being resolved.
pub(crate) fn single_dependency<F>(
    name: &'static str,
    build: F,
) -> impl Fn(&MetricConfiguration) -> Result<BTreeMap<String, MetricConfiguration>> + Send + Sync + 'static
where
    F: Fn(&MetricConfiguration) -> MetricConfiguration + Send + Sync + 'static,
{
    move |configuration| {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(name.to_string(), build(configuration));
        Ok(dependencies)
    }
}

/// Error for a dependency that resolved to the wrong kind of value.
pub(crate) fn unexpected_dependency(metric_name: &str, dependency: &str) -> ExpectationsError {
    ExpectationsError::provider_message(
        metric_name,
        format!("dependency '{}' did not resolve to a condition for this engine", dependency),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_values() {
        let columns = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            shape_values(MetricDomainType::Column, &columns[..1], vec![json!(1)]),
            json!(1)
        );
        assert_eq!(
            shape_values(MetricDomainType::ColumnPair, &columns, vec![json!(1), json!(2)]),
            json!([1, 2])
        );
        assert_eq!(
            shape_values(MetricDomainType::Multicolumn, &columns, vec![json!(1), json!(2)]),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_result_limit() {
        assert_eq!(result_limit(&Kwargs::new()).unwrap(), Some(20));
        let complete = Kwargs::new().with("result_format", "COMPLETE");
        assert_eq!(result_limit(&complete).unwrap(), None);
        let summary = Kwargs::new().with(
            "result_format",
            json!({"result_format": "SUMMARY", "partial_unexpected_count": 3}),
        );
        assert_eq!(result_limit(&summary).unwrap(), Some(3));
    }
}
