//! Expectations: what to compute and how to judge it.
//!
//! An expectation turns its configuration into named metric dependencies
//! ([`Expectation::get_validation_dependencies`]) and, once those are
//! resolved, into a success flag plus a result payload shaped by the result
//! format ([`Expectation::validate`]). Expectations never touch a backend;
//! the [`Validator`](crate::validator::Validator) drives resolution.
//!
//! # Catalogue
//! - Map expectations, one row-level condition each ([`map`])
//! - Aggregate expectations comparing one observed value with bounds
//!   ([`aggregate`])
//! - `expect_unexpected_rows_query_to_return_no_rows` ([`query`])

pub mod aggregate;
pub mod configuration;
pub mod map;
pub mod query;
pub mod result;

pub use configuration::{ExpectationConfiguration, ValidatedConfiguration};
pub use result::{ExceptionInfo, ExpectationValidationResult, SuiteValidationResult, ValidationStatistics};

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::{ConfigValidationError, ResultFormatConfig};
use crate::domain::{
    COLUMN_A_KEY, COLUMN_B_KEY, COLUMN_KEY, COLUMN_LIST_KEY, COLUMNS_KEY, MetricDomainType,
};
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::{ExpectationsError, Result};

/// Kwarg holding the tolerated success ratio of map expectations.
pub const MOSTLY_KEY: &str = "mostly";

/// Metric configurations an expectation needs, keyed by dependency name.
pub type ValidationDependencies = BTreeMap<String, MetricConfiguration>;

/// Resolved dependency values, keyed by dependency name.
pub type ResolvedMetrics = BTreeMap<String, Value>;

/// Verdict of one expectation before it is wrapped into a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationOutcome {
    /// Whether the data met the expectation
    pub success: bool,
    /// Result payload, shaped by the result format
    pub result: Map<String, Value>,
}

/// Behavior shared by every expectation type.
pub trait Expectation: Send + Sync + std::fmt::Debug {
    /// Registered expectation type, e.g. `expect_column_values_to_not_be_null`.
    fn expectation_type(&self) -> &'static str;

    /// Domain the expectation's metrics read.
    fn domain_type(&self) -> MetricDomainType;

    /// Kwargs filled in when a configuration leaves them unset.
    fn default_kwargs(&self) -> Kwargs {
        Kwargs::new()
    }

    /// Rejects kwargs that cannot be evaluated. Runs before any backend call.
    fn validate_configuration(&self, kwargs: &Kwargs) -> Result<()> {
        validate_common(self.domain_type(), kwargs)
    }

    /// Metrics needed to judge this configuration on `engine`.
    fn get_validation_dependencies(
        &self,
        configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        engine: EngineType,
    ) -> Result<ValidationDependencies>;

    /// Judges the resolved metrics.
    fn validate(
        &self,
        configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        metrics: &ResolvedMetrics,
        engine: EngineType,
    ) -> Result<ExpectationOutcome>;
}

static QUERY_EXPECTATIONS: &[&dyn Expectation] = &[&query::UNEXPECTED_ROWS_QUERY];

/// Every built-in expectation.
pub fn expectations() -> impl Iterator<Item = &'static dyn Expectation> {
    map::MAP_EXPECTATIONS
        .iter()
        .map(|e| e as &dyn Expectation)
        .chain(aggregate::AGGREGATE_EXPECTATIONS.iter().map(|e| e as &dyn Expectation))
        .chain(QUERY_EXPECTATIONS.iter().copied())
}

/// Finds an expectation by type name.
pub fn find_expectation(expectation_type: &str) -> Option<&'static dyn Expectation> {
    expectations().find(|e| e.expectation_type() == expectation_type)
}

/// Checks the accessor kwargs of the domain, `mostly` and `result_format`.
pub fn validate_common(domain_type: MetricDomainType, kwargs: &Kwargs) -> Result<()> {
    match domain_type {
        MetricDomainType::Column => {
            kwargs.require_str(COLUMN_KEY)?;
        }
        MetricDomainType::ColumnPair => {
            kwargs.require_str(COLUMN_A_KEY)?;
            kwargs.require_str(COLUMN_B_KEY)?;
        }
        MetricDomainType::Multicolumn => {
            let columns = kwargs
                .get_str_list(COLUMN_LIST_KEY)
                .or_else(|| kwargs.get_str_list(COLUMNS_KEY));
            if columns.is_none_or(|c| c.is_empty()) {
                return Err(ExpectationsError::configuration(
                    "column_list must be a non-empty list of column names",
                ));
            }
        }
        MetricDomainType::Table | MetricDomainType::Identity => {}
    }

    if let Some(mostly) = kwargs.get(MOSTLY_KEY) {
        let value = mostly.as_f64().ok_or_else(|| {
            ExpectationsError::configuration(format!("mostly must be a number, got {}", mostly))
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigValidationError::InvalidMostly(value).into());
        }
    }
    if let Some(result_format) = kwargs.get("result_format") {
        ResultFormatConfig::from_value(result_format)?;
    }
    Ok(())
}

/// Domain kwargs of a configuration for metrics of `domain_type`.
pub fn domain_kwargs(kwargs: &Kwargs, domain_type: MetricDomainType) -> Kwargs {
    kwargs.subset(domain_type.default_domain_keys())
}

/// Reads a resolved count.
pub(crate) fn resolved_count(metrics: &ResolvedMetrics, name: &str) -> Result<u64> {
    let value = resolved(metrics, name)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
        .or_else(|| value.is_null().then_some(0))
        .ok_or_else(|| ExpectationsError::invalid_result(name, value))
}

/// Reads a resolved dependency.
pub(crate) fn resolved<'m>(metrics: &'m ResolvedMetrics, name: &str) -> Result<&'m Value> {
    metrics.get(name).ok_or_else(|| {
        ExpectationsError::metric_resolution(format!("dependency {} was not resolved", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_names_are_unique() {
        let mut names: Vec<&str> = expectations().map(|e| e.expectation_type()).collect();
        let count = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), count);
        assert!(find_expectation("expect_column_values_to_not_be_null").is_some());
        assert!(find_expectation("expect_column_to_exist").is_none());
    }

    #[test]
    fn test_validate_common() {
        let column = Kwargs::new().with("column", "a");
        assert!(validate_common(MetricDomainType::Column, &column).is_ok());
        assert!(validate_common(MetricDomainType::Column, &Kwargs::new()).is_err());

        let bad_mostly = column.clone().with("mostly", 1.5);
        assert!(matches!(
            validate_common(MetricDomainType::Column, &bad_mostly).unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));

        let bad_format = column.with("result_format", "VERBOSE");
        assert!(validate_common(MetricDomainType::Column, &bad_format).is_err());

        let empty_list = Kwargs::new().with("column_list", serde_json::json!([]));
        assert!(validate_common(MetricDomainType::Multicolumn, &empty_list).is_err());

        let synonym = Kwargs::new().with("columns", serde_json::json!(["a", "b"]));
        assert!(validate_common(MetricDomainType::Multicolumn, &synonym).is_ok());
        assert_eq!(
            domain_kwargs(&synonym, MetricDomainType::Multicolumn),
            synonym
        );
    }

    #[test]
    fn test_resolved_count() {
        let metrics: ResolvedMetrics = [
            ("a".to_string(), Value::from(3)),
            ("b".to_string(), Value::from(2.0)),
            ("c".to_string(), Value::Null),
            ("d".to_string(), Value::from("x")),
        ]
        .into_iter()
        .collect();
        assert_eq!(resolved_count(&metrics, "a").unwrap(), 3);
        assert_eq!(resolved_count(&metrics, "b").unwrap(), 2);
        assert_eq!(resolved_count(&metrics, "c").unwrap(), 0);
        assert!(resolved_count(&metrics, "d").is_err());
        assert!(resolved_count(&metrics, "e").is_err());
    }
}
