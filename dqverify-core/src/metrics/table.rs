//! Table metrics.

use serde_json::{Value, json};

use crate::Result;
use crate::domain::MetricDomainType;
use crate::engine::table::{TableView, json_type_name};
use crate::kwargs::Kwargs;
use crate::metric_value::MetricValue;
use crate::provider::aggregate::AggregateMetricProvider;
use crate::provider::single_dependency;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};

#[cfg(feature = "polars")]
use crate::engine::frame::FrameMetricOutcome;
#[cfg(feature = "sqlite")]
use crate::engine::sql::SqlMetricOutcome;

/// Metric name of the row count.
pub const ROW_COUNT_METRIC: &str = "table.row_count";
/// Metric name of the column type listing.
pub const COLUMN_TYPES_METRIC: &str = "table.column_types";
/// Metric name of the column name listing.
pub const COLUMNS_METRIC: &str = "table.columns";

/// Number of rows in the domain.
pub static ROW_COUNT: AggregateMetricProvider = AggregateMetricProvider {
    metric_name: ROW_COUNT_METRIC,
    metric_class: "TableRowCount",
    domain_type: MetricDomainType::Table,
    value_keys: &[],
    table: Some(row_count_table),
    #[cfg(feature = "sqlite")]
    sql: Some(row_count_sql),
    #[cfg(feature = "polars")]
    frame: Some(row_count_frame),
};

fn row_count_table(view: &TableView, _: &[String], _: &Kwargs) -> Result<Value> {
    Ok(Value::from(view.len()))
}

#[cfg(feature = "sqlite")]
fn row_count_sql(_: &[String], _: &Kwargs) -> Result<String> {
    Ok("COUNT(*)".to_string())
}

#[cfg(feature = "polars")]
fn row_count_frame(_: &[String], _: &Kwargs) -> Result<polars::prelude::Expr> {
    Ok(polars::prelude::len())
}

fn column_entry(name: &str, type_name: &str) -> Value {
    json!({"name": name, "type": type_name})
}

pub(crate) fn register(registry: &MetricRegistry) -> Result<()> {
    let column_types = |provider| {
        MetricRegistration::new(
            COLUMN_TYPES_METRIC,
            "TableColumnTypes",
            MetricFnType::Value,
            MetricDomainType::Table,
            provider,
        )
    };

    registry.register_metric(column_types(MetricFn::table(|call| {
        let domain = call
            .engine
            .get_compute_domain(call.domain_kwargs(), MetricDomainType::Table)?;
        let view = &domain.handle;
        let entries = view
            .columns()
            .iter()
            .map(|name| {
                let values = view.column(name)?.into_iter().map(|(_, v)| v.clone());
                Ok(column_entry(name, json_type_name(values)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MetricValue::json(Value::Array(entries)))
    })))?;

    #[cfg(feature = "sqlite")]
    registry.register_metric(column_types(MetricFn::sql(|call| {
        let entries = call
            .engine
            .batch_columns(call.domain_kwargs())?
            .iter()
            .map(|c| column_entry(&c.name, &c.type_name))
            .collect();
        Ok(SqlMetricOutcome::Value(MetricValue::json(Value::Array(entries))))
    })))?;

    #[cfg(feature = "polars")]
    registry.register_metric(column_types(MetricFn::frame(|call| {
        let entries = call
            .engine
            .batch_schema(call.domain_kwargs())?
            .iter()
            .map(|(name, dtype)| column_entry(name.as_str(), &dtype.to_string()))
            .collect();
        Ok(FrameMetricOutcome::Value(MetricValue::json(Value::Array(entries))))
    })))?;

    let columns = |provider| {
        MetricRegistration::new(
            COLUMNS_METRIC,
            "TableColumns",
            MetricFnType::Value,
            MetricDomainType::Table,
            provider,
        )
        .with_dependencies(single_dependency(COLUMN_TYPES_METRIC, |configuration| {
            configuration.renamed(COLUMN_TYPES_METRIC)
        }))
    };

    registry.register_metric(columns(MetricFn::table(|call| {
        column_names(call.dependency_json(COLUMN_TYPES_METRIC)?)
    })))?;
    #[cfg(feature = "sqlite")]
    registry.register_metric(columns(MetricFn::sql(|call| {
        Ok(SqlMetricOutcome::Value(column_names(
            call.dependency_json(COLUMN_TYPES_METRIC)?,
        )?))
    })))?;
    #[cfg(feature = "polars")]
    registry.register_metric(columns(MetricFn::frame(|call| {
        Ok(FrameMetricOutcome::Value(column_names(
            call.dependency_json(COLUMN_TYPES_METRIC)?,
        )?))
    })))?;
    Ok(())
}

fn column_names(column_types: &Value) -> Result<MetricValue> {
    let names = column_types
        .as_array()
        .map(|entries| entries.iter().filter_map(|e| e.get("name").cloned()).collect())
        .unwrap_or_default();
    Ok(MetricValue::json(Value::Array(names)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchSpec;
    use crate::engine::ExecutionEngine;
    use crate::engine::table::TableExecutionEngine;
    use crate::metric_configuration::MetricConfiguration;
    use crate::metric_value::MetricValues;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_columns_follow_column_types() {
        let registry = Arc::new(MetricRegistry::with_builtin_metrics().unwrap());
        let mut engine = TableExecutionEngine::with_registry(registry);
        engine
            .load_batch(BatchSpec::records(json!([{"a": 1, "b": "x"}, {"a": 2.5, "b": null}])))
            .await
            .unwrap();

        let columns = MetricConfiguration::new(COLUMNS_METRIC, Kwargs::new(), Kwargs::new());
        let types = columns.renamed(COLUMN_TYPES_METRIC);
        let resolved = engine
            .resolve_metrics(&[columns.clone()], &MetricValues::new())
            .await
            .unwrap();

        assert_eq!(resolved[&columns.id()].to_json(), json!(["a", "b"]));
        assert_eq!(
            resolved[&types.id()].to_json(),
            json!([{"name": "a", "type": "float"}, {"name": "b", "type": "string"}])
        );
    }
}
