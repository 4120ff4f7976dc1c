//! Column aggregates, distinct values and partitions.
//!
//! Nulls are skipped by every aggregate, as SQL aggregates and polars
//! reductions do natively. An aggregate over no values is null, except
//! `column.sum` on the table engine which reports 0.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::domain::MetricDomainType;
use crate::engine::MetricCall;
use crate::engine::table::TableView;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::{MetricValue, compare_json, f64_to_json, is_missing};
use crate::provider::aggregate::AggregateMetricProvider;
use crate::provider::accessor_columns;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};
use crate::{ExpectationsError, Result};

#[cfg(feature = "polars")]
use crate::engine::frame::{FrameMetricOutcome, series_to_json};
#[cfg(feature = "sqlite")]
use crate::engine::sql::{SqlMetricOutcome, quote_identifier};
#[cfg(feature = "polars")]
use polars::prelude::{Expr, col};

/// Metric name of the sorted distinct non-null values.
pub const DISTINCT_VALUES_METRIC: &str = "column.distinct_values";

/// Metric name of the histogram bin edges of a column.
pub const PARTITION_METRIC: &str = "column.partition";

/// Bin count used when `n_bins` is unset.
pub const DEFAULT_PARTITION_BINS: u64 = 10;

macro_rules! column_aggregate {
    ($name:ident, $metric:literal, $class:literal, $table:ident, $sql:literal, $frame:ident) => {
        #[doc = concat!("`", $metric, "` over the non-null values of a column.")]
        pub static $name: AggregateMetricProvider = AggregateMetricProvider {
            metric_name: $metric,
            metric_class: $class,
            domain_type: MetricDomainType::Column,
            value_keys: &[],
            table: Some($table),
            #[cfg(feature = "sqlite")]
            sql: Some(|columns, _| Ok(format!(concat!($sql, "({})"), sql_column(columns)?))),
            #[cfg(feature = "polars")]
            frame: Some(|columns, _| Ok(col(first_column(columns)?).$frame())),
        };
    };
}

column_aggregate!(MAX, "column.max", "ColumnMax", max_table, "MAX", max);
column_aggregate!(MIN, "column.min", "ColumnMin", min_table, "MIN", min);
column_aggregate!(MEAN, "column.mean", "ColumnMean", mean_table, "AVG", mean);
column_aggregate!(SUM, "column.sum", "ColumnSum", sum_table, "SUM", sum);

fn first_column(columns: &[String]) -> Result<&str> {
    columns
        .first()
        .map(String::as_str)
        .ok_or_else(|| ExpectationsError::configuration("column aggregate requires a column"))
}

#[cfg(feature = "sqlite")]
fn sql_column(columns: &[String]) -> Result<String> {
    Ok(quote_identifier(first_column(columns)?))
}

fn present_values<'v>(view: &'v TableView, columns: &[String]) -> Result<Vec<&'v Value>> {
    Ok(view
        .column(first_column(columns)?)?
        .into_iter()
        .map(|(_, value)| value)
        .filter(|value| !is_missing(value))
        .collect())
}

fn max_table(view: &TableView, columns: &[String], _: &Kwargs) -> Result<Value> {
    Ok(present_values(view, columns)?
        .into_iter()
        .max_by(|a, b| compare_json(a, b))
        .cloned()
        .unwrap_or(Value::Null))
}

fn min_table(view: &TableView, columns: &[String], _: &Kwargs) -> Result<Value> {
    Ok(present_values(view, columns)?
        .into_iter()
        .min_by(|a, b| compare_json(a, b))
        .cloned()
        .unwrap_or(Value::Null))
}

fn numbers<'v>(metric_name: &str, values: &[&'v Value]) -> Result<Vec<&'v serde_json::Number>> {
    values
        .iter()
        .map(|value| match *value {
            Value::Number(n) => Ok(n),
            other => Err(ExpectationsError::provider_message(
                metric_name,
                format!("non-numeric value {} in column", other),
            )),
        })
        .collect()
}

fn mean_table(view: &TableView, columns: &[String], _: &Kwargs) -> Result<Value> {
    let values = present_values(view, columns)?;
    let numbers = numbers(MEAN.metric_name, &values)?;
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    let total: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
    #[allow(clippy::cast_precision_loss)]
    Ok(f64_to_json(total / numbers.len() as f64))
}

fn sum_table(view: &TableView, columns: &[String], _: &Kwargs) -> Result<Value> {
    let values = present_values(view, columns)?;
    let numbers = numbers(SUM.metric_name, &values)?;
    let integral = numbers
        .iter()
        .try_fold(0i64, |acc, n| n.as_i64().and_then(|i| acc.checked_add(i)));
    Ok(match integral {
        Some(total) => Value::from(total),
        None => f64_to_json(numbers.iter().filter_map(|n| n.as_f64()).sum()),
    })
}

fn distinct_sorted(values: impl IntoIterator<Item = Value>) -> Value {
    let mut seen = HashSet::new();
    let mut distinct: Vec<Value> = values
        .into_iter()
        .filter(|value| !is_missing(value) && seen.insert(value.to_string()))
        .collect();
    distinct.sort_by(compare_json);
    Value::Array(distinct)
}

/// Bin edges between `min` and `max`, `n_bins + 1` of them.
///
/// Only `bins: "uniform"` is supported. An empty column has no edges.
fn partition_edges(value_kwargs: &Kwargs, min: &Value, max: &Value) -> Result<Value> {
    match value_kwargs.get_str("bins").unwrap_or("uniform") {
        "uniform" => {}
        other => {
            return Err(ExpectationsError::configuration(format!(
                "unsupported bins '{}'; only uniform partitions are computed",
                other
            )));
        }
    }
    let n_bins = match value_kwargs.get("n_bins") {
        None | Some(Value::Null) => DEFAULT_PARTITION_BINS,
        Some(value) => value.as_u64().filter(|n| *n > 0).ok_or_else(|| {
            ExpectationsError::configuration(format!(
                "n_bins must be a positive integer, got {}",
                value
            ))
        })?,
    };
    if min.is_null() || max.is_null() {
        return Ok(Value::Array(Vec::new()));
    }
    let (Some(low), Some(high)) = (min.as_f64(), max.as_f64()) else {
        return Err(ExpectationsError::provider_message(
            PARTITION_METRIC,
            format!("cannot partition non-numeric range [{}, {}]", min, max),
        ));
    };

    #[allow(clippy::cast_precision_loss)]
    let step = (high - low) / n_bins as f64;
    #[allow(clippy::cast_precision_loss)]
    let edges = (0..=n_bins)
        .map(|i| {
            if i == n_bins {
                f64_to_json(high)
            } else {
                f64_to_json(low + step * i as f64)
            }
        })
        .collect();
    Ok(Value::Array(edges))
}

fn partition_value<E>(call: &MetricCall<'_, E>) -> Result<MetricValue> {
    let min = call.dependency_json(MIN.metric_name)?;
    let max = call.dependency_json(MAX.metric_name)?;
    Ok(MetricValue::Json(partition_edges(call.value_kwargs(), min, max)?))
}

fn partition_dependencies(
    configuration: &MetricConfiguration,
) -> Result<BTreeMap<String, MetricConfiguration>> {
    Ok([MIN.metric_name, MAX.metric_name]
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                MetricConfiguration::new(
                    name,
                    configuration.metric_domain_kwargs.clone(),
                    Kwargs::new(),
                ),
            )
        })
        .collect())
}

pub(crate) fn register(registry: &MetricRegistry) -> Result<()> {
    let partition = |provider| {
        MetricRegistration::new(
            PARTITION_METRIC,
            "ColumnPartition",
            MetricFnType::Value,
            MetricDomainType::Column,
            provider,
        )
        .with_value_keys(&["bins", "n_bins", "allow_relative_error"])
        .with_dependencies(partition_dependencies)
    };
    registry.register_metric(partition(MetricFn::table(|call| partition_value(call))))?;
    #[cfg(feature = "sqlite")]
    registry.register_metric(partition(MetricFn::sql(|call| {
        Ok(SqlMetricOutcome::Value(partition_value(call)?))
    })))?;
    #[cfg(feature = "polars")]
    registry.register_metric(partition(MetricFn::frame(|call| {
        Ok(FrameMetricOutcome::Value(partition_value(call)?))
    })))?;

    let distinct_values = |provider| {
        MetricRegistration::new(
            DISTINCT_VALUES_METRIC,
            "ColumnDistinctValues",
            MetricFnType::Value,
            MetricDomainType::Column,
            provider,
        )
    };

    registry.register_metric(distinct_values(MetricFn::table(|call| {
        let domain = call
            .engine
            .get_compute_domain(call.domain_kwargs(), MetricDomainType::Column)?;
        let columns = accessor_columns(&domain.accessor_kwargs, MetricDomainType::Column)?;
        let values = present_values(&domain.handle, &columns)?;
        Ok(MetricValue::Json(distinct_sorted(values.into_iter().cloned())))
    })))?;

    #[cfg(feature = "sqlite")]
    registry.register_metric(distinct_values(MetricFn::sql(|call| {
        let domain = call
            .engine
            .get_compute_domain(call.domain_kwargs(), MetricDomainType::Column)?;
        let columns = accessor_columns(&domain.accessor_kwargs, MetricDomainType::Column)?;
        let column = sql_column(&columns)?;
        let sql = domain
            .handle
            .and_where(format!("{} IS NOT NULL", column))
            .select(&format!("DISTINCT {} AS \"value\"", column));
        Ok(SqlMetricOutcome::query(sql, |records| {
            Ok(MetricValue::Json(distinct_sorted(
                records.into_iter().filter_map(|r| r.values.into_iter().next()),
            )))
        }))
    })))?;

    #[cfg(feature = "polars")]
    registry.register_metric(distinct_values(MetricFn::frame(|call| {
        let domain = call
            .engine
            .get_compute_domain(call.domain_kwargs(), MetricDomainType::Column)?;
        let columns = accessor_columns(&domain.accessor_kwargs, MetricDomainType::Column)?;
        let column: Expr = col(first_column(&columns)?);
        let frame = call
            .engine
            .collect(domain.handle.frame().select([column.drop_nulls().unique()]))?;
        let values = frame
            .get_columns()
            .first()
            .map(series_to_json)
            .transpose()?
            .unwrap_or_default();
        Ok(FrameMetricOutcome::Value(MetricValue::Json(distinct_sorted(values))))
    })))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::table::TableData;
    use serde_json::json;
    use std::sync::Arc;

    fn view(records: Value) -> TableView {
        let data = Arc::new(TableData::from_records(&records).unwrap());
        let rows = (0..data.row_count()).collect();
        TableView::new(data, rows, Vec::new())
    }

    #[test]
    fn test_table_aggregates_skip_nulls() {
        let view = view(json!([{"a": 3}, {"a": null}, {"a": 1}, {"a": 2}]));
        let columns = vec!["a".to_string()];
        let kwargs = Kwargs::new();
        assert_eq!(max_table(&view, &columns, &kwargs).unwrap(), json!(3));
        assert_eq!(min_table(&view, &columns, &kwargs).unwrap(), json!(1));
        assert_eq!(mean_table(&view, &columns, &kwargs).unwrap(), json!(2.0));
        assert_eq!(sum_table(&view, &columns, &kwargs).unwrap(), json!(6));
    }

    #[test]
    fn test_mean_rejects_strings() {
        let view = view(json!([{"a": "x"}]));
        let err = mean_table(&view, &["a".to_string()], &Kwargs::new()).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_distinct_sorted() {
        assert_eq!(
            distinct_sorted(vec![json!(2), json!(1), Value::Null, json!(2)]),
            json!([1, 2])
        );
    }

    #[test]
    fn test_uniform_partition_edges() {
        let kwargs = Kwargs::new().with("n_bins", 4);
        assert_eq!(
            partition_edges(&kwargs, &json!(0), &json!(10)).unwrap(),
            json!([0.0, 2.5, 5.0, 7.5, 10.0])
        );
        assert_eq!(
            partition_edges(&Kwargs::new(), &Value::Null, &Value::Null).unwrap(),
            json!([])
        );
        assert_eq!(
            partition_edges(&Kwargs::new(), &json!(1), &json!(1))
                .unwrap()
                .as_array()
                .map(Vec::len),
            Some(11)
        );
    }

    #[test]
    fn test_partition_rejects_bad_kwargs() {
        let auto = Kwargs::new().with("bins", "auto");
        assert!(matches!(
            partition_edges(&auto, &json!(0), &json!(1)).unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));
        let zero = Kwargs::new().with("n_bins", 0);
        assert!(partition_edges(&zero, &json!(0), &json!(1)).is_err());
        assert!(matches!(
            partition_edges(&Kwargs::new(), &json!("a"), &json!("z")).unwrap_err(),
            ExpectationsError::MetricProvider { .. }
        ));
    }
}
