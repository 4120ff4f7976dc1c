//! Aggregate expectations: one observed value compared with bounds.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::map::check_bounds;
use super::{
    Expectation, ExpectationOutcome, ResolvedMetrics, ValidatedConfiguration,
    ValidationDependencies, domain_kwargs, resolved, validate_common,
};
use crate::Result;
use crate::config::{ResultFormat, ResultFormatConfig};
use crate::domain::MetricDomainType;
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::compare_json;

/// Static description of a between-style aggregate expectation.
#[derive(Debug)]
pub struct AggregateExpectationSpec {
    /// Expectation type name
    pub expectation_type: &'static str,
    /// Metric producing the observed value
    pub metric_name: &'static str,
    /// Domain of the metric
    pub domain_type: MetricDomainType,
}

/// Every built-in aggregate expectation.
pub static AGGREGATE_EXPECTATIONS: &[AggregateExpectationSpec] = &[
    AggregateExpectationSpec {
        expectation_type: "expect_table_row_count_to_be_between",
        metric_name: "table.row_count",
        domain_type: MetricDomainType::Table,
    },
    AggregateExpectationSpec {
        expectation_type: "expect_column_max_to_be_between",
        metric_name: "column.max",
        domain_type: MetricDomainType::Column,
    },
    AggregateExpectationSpec {
        expectation_type: "expect_column_mean_to_be_between",
        metric_name: "column.mean",
        domain_type: MetricDomainType::Column,
    },
];

/// Whether `observed` lies within the configured bounds. A missing
/// observation, or one of a different type than a bound, is out of range.
fn within_bounds(observed: &Value, kwargs: &Kwargs) -> bool {
    if observed.is_null() {
        return false;
    }
    let check = |key: &str, strict_key: &str, accept: fn(Ordering, bool) -> bool| match kwargs
        .get(key)
        .filter(|b| !b.is_null())
    {
        None => true,
        Some(bound) if bound.is_number() != observed.is_number() => false,
        Some(bound) => accept(
            compare_json(observed, bound),
            kwargs.get_bool(strict_key).unwrap_or(false),
        ),
    };
    check("min_value", "strict_min", |o, strict| {
        if strict { o.is_gt() } else { o.is_ge() }
    }) && check("max_value", "strict_max", |o, strict| {
        if strict { o.is_lt() } else { o.is_le() }
    })
}

impl Expectation for AggregateExpectationSpec {
    fn expectation_type(&self) -> &'static str {
        self.expectation_type
    }

    fn domain_type(&self) -> MetricDomainType {
        self.domain_type
    }

    fn default_kwargs(&self) -> Kwargs {
        Kwargs::new().with("strict_min", false).with("strict_max", false)
    }

    fn validate_configuration(&self, kwargs: &Kwargs) -> Result<()> {
        validate_common(self.domain_type, kwargs)?;
        check_bounds(kwargs)
    }

    fn get_validation_dependencies(
        &self,
        configuration: &ValidatedConfiguration,
        _result_format: &ResultFormatConfig,
        _engine: EngineType,
    ) -> Result<ValidationDependencies> {
        let mut dependencies = ValidationDependencies::new();
        dependencies.insert(
            self.metric_name.to_string(),
            MetricConfiguration::new(
                self.metric_name,
                domain_kwargs(configuration.kwargs(), self.domain_type),
                Kwargs::new(),
            ),
        );
        Ok(dependencies)
    }

    fn validate(
        &self,
        configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        metrics: &ResolvedMetrics,
        _engine: EngineType,
    ) -> Result<ExpectationOutcome> {
        let observed = resolved(metrics, self.metric_name)?;
        let success = within_bounds(observed, configuration.kwargs());
        let mut result = Map::new();
        if result_format.result_format != ResultFormat::BooleanOnly {
            result.insert("observed_value".into(), observed.clone());
        }
        Ok(ExpectationOutcome { success, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::ExpectationConfiguration;
    use serde_json::json;

    #[test]
    fn test_within_bounds() {
        let kwargs = Kwargs::new().with("min_value", 1).with("max_value", 5);
        assert!(within_bounds(&json!(1), &kwargs));
        assert!(within_bounds(&json!(5.0), &kwargs));
        assert!(!within_bounds(&json!(6), &kwargs));
        assert!(!within_bounds(&Value::Null, &kwargs));
        assert!(!within_bounds(&json!("3"), &kwargs));

        let strict = kwargs.with("strict_max", true);
        assert!(!within_bounds(&json!(5), &strict));

        let open_max = Kwargs::new().with("min_value", 3).with("max_value", Value::Null);
        assert!(within_bounds(&json!(1000), &open_max));
    }

    #[test]
    fn test_observed_value_payload() {
        let configuration = ExpectationConfiguration::new(
            "expect_table_row_count_to_be_between",
            Kwargs::new().with("min_value", 1),
        )
        .validate()
        .unwrap();
        let expectation = configuration.expectation();
        let dependencies = expectation
            .get_validation_dependencies(&configuration, &ResultFormatConfig::new(), EngineType::Table)
            .unwrap();
        assert!(dependencies.contains_key("table.row_count"));

        let metrics: ResolvedMetrics = [("table.row_count".to_string(), json!(0))].into_iter().collect();
        let outcome = expectation
            .validate(&configuration, &ResultFormatConfig::new(), &metrics, EngineType::Table)
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.result["observed_value"], json!(0));
    }

    #[test]
    fn test_bounds_are_required() {
        let configuration = ExpectationConfiguration::new(
            "expect_column_max_to_be_between",
            Kwargs::new().with("column", "a"),
        );
        assert!(configuration.validate().is_err());
    }
}
