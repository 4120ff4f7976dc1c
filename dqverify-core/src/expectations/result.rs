//! Validation results.
//!
//! Result payloads are the stable contract of the engine: every percent field
//! lies in `[0, 100]` and every count is non-negative, or the result is not
//! constructed at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ExpectationConfiguration;
use crate::kwargs::Kwargs;
use crate::{ExpectationsError, Result};

/// What went wrong while evaluating an expectation, if anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Whether evaluation raised an error
    pub raised_exception: bool,
    /// The error with its source chain
    pub exception_traceback: Option<String>,
    /// The error message
    pub exception_message: Option<String>,
}

impl ExceptionInfo {
    /// Captures an error.
    pub fn from_error(error: &ExpectationsError) -> Self {
        Self {
            raised_exception: true,
            exception_traceback: Some(error.chain()),
            exception_message: Some(error.to_string()),
        }
    }
}

/// Outcome of evaluating one expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationValidationResult {
    /// Whether the data met the expectation
    pub success: bool,
    /// Result payload shaped by the result format
    pub result: Map<String, Value>,
    /// Captured error, when evaluation failed
    pub exception_info: ExceptionInfo,
    /// Metadata copied from the configuration
    #[serde(default, skip_serializing_if = "Kwargs::is_empty")]
    pub meta: Kwargs,
    /// The evaluated configuration, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation_config: Option<ExpectationConfiguration>,
}

impl ExpectationValidationResult {
    /// Creates a result, rejecting out-of-range percents and counts.
    pub fn new(success: bool, result: Map<String, Value>) -> Result<Self> {
        check_ranges(&result)?;
        Ok(Self {
            success,
            result,
            exception_info: ExceptionInfo::default(),
            meta: Kwargs::new(),
            expectation_config: None,
        })
    }

    /// Creates a failed result carrying the error.
    pub fn from_error(error: &ExpectationsError) -> Self {
        Self {
            success: false,
            result: Map::new(),
            exception_info: ExceptionInfo::from_error(error),
            meta: Kwargs::new(),
            expectation_config: None,
        }
    }

    /// Builder method to attach the configuration and its metadata.
    pub fn with_config(mut self, configuration: &ExpectationConfiguration) -> Self {
        self.meta = configuration.meta.clone();
        self.expectation_config = Some(configuration.clone());
        self
    }
}

fn check_ranges(result: &Map<String, Value>) -> Result<()> {
    for (field, value) in result {
        let Some(number) = value.as_f64() else {
            continue;
        };
        if field.contains("percent") && !(0.0..=100.0).contains(&number) {
            return Err(ExpectationsError::invalid_result(field, value));
        }
        if field.ends_with("_count") && number < 0.0 {
            return Err(ExpectationsError::invalid_result(field, value));
        }
    }
    Ok(())
}

/// Aggregate counts over a suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    /// Number of expectations evaluated
    pub evaluated_expectations: usize,
    /// Number that succeeded
    pub successful_expectations: usize,
    /// Number that failed, including errors
    pub unsuccessful_expectations: usize,
    /// Share of successes in percent; `None` for an empty suite
    pub success_percent: Option<f64>,
}

impl ValidationStatistics {
    /// Tallies a list of results.
    pub fn from_results(results: &[ExpectationValidationResult]) -> Self {
        let evaluated = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            evaluated_expectations: evaluated,
            successful_expectations: successful,
            unsuccessful_expectations: evaluated - successful,
            success_percent: (evaluated > 0)
                .then(|| successful as f64 / evaluated as f64 * 100.0),
        }
    }
}

/// Outcome of a suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteValidationResult {
    /// True when every expectation succeeded
    pub success: bool,
    /// Aggregate counts
    pub statistics: ValidationStatistics,
    /// Per-expectation results, in suite order
    pub results: Vec<ExpectationValidationResult>,
}

impl SuiteValidationResult {
    /// Builds the suite result from per-expectation results.
    pub fn from_results(results: Vec<ExpectationValidationResult>) -> Self {
        let statistics = ValidationStatistics::from_results(&results);
        Self {
            success: statistics.unsuccessful_expectations == 0,
            statistics,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_ranges_are_enforced() {
        assert!(
            ExpectationValidationResult::new(
                true,
                payload(json!({"unexpected_percent": 40.0, "unexpected_count": 2}))
            )
            .is_ok()
        );
        assert!(matches!(
            ExpectationValidationResult::new(true, payload(json!({"missing_percent": 100.5})))
                .unwrap_err(),
            ExpectationsError::InvalidResult { .. }
        ));
        assert!(
            ExpectationValidationResult::new(true, payload(json!({"element_count": -1}))).is_err()
        );
        // Null percents are allowed (empty domains).
        assert!(
            ExpectationValidationResult::new(true, payload(json!({"unexpected_percent": null})))
                .is_ok()
        );
    }

    #[test]
    fn test_error_results_fail() {
        let error = ExpectationsError::metric_provider("column.max", "SqlExecutionEngine");
        let result = ExpectationValidationResult::from_error(&error);
        assert!(!result.success);
        assert!(result.exception_info.raised_exception);
        assert!(
            result
                .exception_info
                .exception_message
                .unwrap()
                .contains("column.max")
        );
    }

    #[test]
    fn test_suite_statistics() {
        let ok = ExpectationValidationResult::new(true, Map::new()).unwrap();
        let failed = ExpectationValidationResult::new(false, Map::new()).unwrap();
        let suite = SuiteValidationResult::from_results(vec![ok.clone(), failed, ok]);
        assert!(!suite.success);
        assert_eq!(suite.statistics.evaluated_expectations, 3);
        assert_eq!(suite.statistics.successful_expectations, 2);
        let percent = suite.statistics.success_percent.unwrap();
        assert!((percent - 66.666_666).abs() < 1e-3);

        let empty = SuiteValidationResult::from_results(Vec::new());
        assert!(empty.success);
        assert_eq!(empty.statistics.success_percent, None);
    }
}
