//! Raw SQL query metrics.
//!
//! The `query` value kwarg is a statement in which `{batch}` (or
//! `{active_batch}`) stands for the domain's rows as a subquery. Rows come
//! back as objects keyed by column name.

use serde_json::Value;

use crate::domain::MetricDomainType;
use crate::engine::MetricCall;
use crate::engine::sql::{SqlExecutionEngine, SqlMetricOutcome};
use crate::metric_value::MetricValue;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};
use crate::{ExpectationsError, Result};

/// Metric name of the generic query.
pub const QUERY_TABLE_METRIC: &str = "query.table";
/// Metric name of the query returning unexpected rows.
pub const UNEXPECTED_ROWS_QUERY_METRIC: &str = "unexpected_rows_query.table";

const BATCH_PLACEHOLDERS: [&str; 2] = ["{batch}", "{active_batch}"];

/// Substitutes the batch placeholders of `query` with `subquery`.
pub fn render_query(query: &str, subquery: &str) -> Result<String> {
    if !BATCH_PLACEHOLDERS.iter().any(|p| query.contains(p)) {
        return Err(ExpectationsError::configuration(
            "query must reference the batch as {batch}",
        ));
    }
    Ok(BATCH_PLACEHOLDERS
        .iter()
        .fold(query.to_string(), |query, placeholder| query.replace(placeholder, subquery)))
}

fn run_query(call: &MetricCall<'_, SqlExecutionEngine>) -> Result<SqlMetricOutcome> {
    let query = call.value_kwargs().require_str("query")?;
    let domain = call
        .engine
        .get_compute_domain(call.domain_kwargs(), MetricDomainType::Table)?;
    let sql = render_query(query, &format!("({})", domain.handle.select("*")))?;
    Ok(SqlMetricOutcome::query(sql, |records| {
        Ok(MetricValue::json(Value::Array(
            records.iter().map(|record| record.to_object()).collect(),
        )))
    }))
}

pub(crate) fn register(registry: &MetricRegistry) -> Result<()> {
    for (name, class) in [
        (QUERY_TABLE_METRIC, "QueryTable"),
        (UNEXPECTED_ROWS_QUERY_METRIC, "UnexpectedRowsQueryTable"),
    ] {
        registry.register_metric(
            MetricRegistration::new(
                name,
                class,
                MetricFnType::Value,
                MetricDomainType::Table,
                MetricFn::sql(run_query),
            )
            .with_value_keys(&["query"]),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_query() {
        let sql = render_query("SELECT * FROM {batch} WHERE a > 1", "(SELECT * FROM \"t\")").unwrap();
        assert_eq!(sql, "SELECT * FROM (SELECT * FROM \"t\") WHERE a > 1");

        let sql = render_query("SELECT 1 FROM {active_batch}", "x").unwrap();
        assert_eq!(sql, "SELECT 1 FROM x");
    }

    #[test]
    fn test_render_query_requires_placeholder() {
        assert!(matches!(
            render_query("SELECT 1", "x").unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));
    }
}
