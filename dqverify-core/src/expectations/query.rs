//! Expectations judged by a user-written SQL query.

use serde_json::{Map, Value, json};

use super::{
    Expectation, ExpectationOutcome, ResolvedMetrics, ValidatedConfiguration,
    ValidationDependencies, domain_kwargs, resolved, validate_common,
};
use crate::config::{ResultFormat, ResultFormatConfig};
use crate::domain::MetricDomainType;
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::truncate;
use crate::{ExpectationsError, Result};

/// Metric running the query; registered on the SQL engine only.
const UNEXPECTED_ROWS_QUERY_METRIC: &str = "unexpected_rows_query.table";

/// Kwarg holding the query.
pub const UNEXPECTED_ROWS_QUERY_KEY: &str = "unexpected_rows_query";

/// Succeeds when a query over `{batch}` returns no rows.
#[derive(Debug)]
pub struct UnexpectedRowsQueryExpectation;

/// `expect_unexpected_rows_query_to_return_no_rows`.
pub static UNEXPECTED_ROWS_QUERY: UnexpectedRowsQueryExpectation = UnexpectedRowsQueryExpectation;

impl Expectation for UnexpectedRowsQueryExpectation {
    fn expectation_type(&self) -> &'static str {
        "expect_unexpected_rows_query_to_return_no_rows"
    }

    fn domain_type(&self) -> MetricDomainType {
        MetricDomainType::Table
    }

    fn validate_configuration(&self, kwargs: &Kwargs) -> Result<()> {
        validate_common(self.domain_type(), kwargs)?;
        let query = kwargs.require_str(UNEXPECTED_ROWS_QUERY_KEY)?;
        if !query.contains("{batch}") && !query.contains("{active_batch}") {
            return Err(ExpectationsError::configuration(
                "unexpected_rows_query must reference the batch as {batch}",
            ));
        }
        Ok(())
    }

    fn get_validation_dependencies(
        &self,
        configuration: &ValidatedConfiguration,
        _result_format: &ResultFormatConfig,
        _engine: EngineType,
    ) -> Result<ValidationDependencies> {
        let kwargs = configuration.kwargs();
        let query = kwargs.require_str(UNEXPECTED_ROWS_QUERY_KEY)?;
        let mut dependencies = ValidationDependencies::new();
        dependencies.insert(
            UNEXPECTED_ROWS_QUERY_METRIC.to_string(),
            MetricConfiguration::new(
                UNEXPECTED_ROWS_QUERY_METRIC,
                domain_kwargs(kwargs, MetricDomainType::Table),
                Kwargs::new().with("query", query),
            ),
        );
        Ok(dependencies)
    }

    fn validate(
        &self,
        _configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        metrics: &ResolvedMetrics,
        _engine: EngineType,
    ) -> Result<ExpectationOutcome> {
        let rows = match resolved(metrics, UNEXPECTED_ROWS_QUERY_METRIC)? {
            Value::Array(rows) => rows.clone(),
            other => {
                return Err(ExpectationsError::invalid_result(
                    UNEXPECTED_ROWS_QUERY_METRIC,
                    other,
                ));
            }
        };
        let success = rows.is_empty();
        let mut result = Map::new();
        if result_format.result_format != ResultFormat::BooleanOnly {
            result.insert("observed_value".into(), rows.len().into());
            result.insert(
                "details".into(),
                json!({"unexpected_rows": truncate(rows, result_format.limit())}),
            );
        }
        Ok(ExpectationOutcome { success, result })
    }
}
