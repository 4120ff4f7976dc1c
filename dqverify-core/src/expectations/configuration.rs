//! Expectation configurations.

use serde::{Deserialize, Serialize};

use super::{Expectation, MOSTLY_KEY, find_expectation};
use crate::config::{ResultFormatConfig, RuntimeConfiguration};
use crate::kwargs::Kwargs;
use crate::{ExpectationsError, Result};

/// An expectation as declared by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationConfiguration {
    /// Registered expectation type
    pub expectation_type: String,
    /// Domain, success and result-format kwargs
    #[serde(default)]
    pub kwargs: Kwargs,
    /// Free-form metadata copied to the result
    #[serde(default, skip_serializing_if = "Kwargs::is_empty")]
    pub meta: Kwargs,
}

impl ExpectationConfiguration {
    /// Creates a configuration without metadata.
    pub fn new(expectation_type: impl Into<String>, kwargs: Kwargs) -> Self {
        Self {
            expectation_type: expectation_type.into(),
            kwargs,
            meta: Kwargs::new(),
        }
    }

    /// Builder method to attach metadata.
    pub fn with_meta(mut self, meta: Kwargs) -> Self {
        self.meta = meta;
        self
    }

    /// Fills defaults and validates the kwargs against the expectation type.
    ///
    /// Kwargs problems are reported as `InvalidExpectationConfiguration`.
    pub fn validate(self) -> Result<ValidatedConfiguration> {
        let expectation = find_expectation(&self.expectation_type).ok_or_else(|| {
            ExpectationsError::invalid_expectation_configuration(
                &self.expectation_type,
                "unknown expectation type",
            )
        })?;

        let kwargs = expectation.default_kwargs().merged(&self.kwargs);
        expectation
            .validate_configuration(&kwargs)
            .map_err(|error| match error {
                ExpectationsError::Configuration { message } => {
                    ExpectationsError::invalid_expectation_configuration(
                        &self.expectation_type,
                        message,
                    )
                }
                other => other,
            })?;

        Ok(ValidatedConfiguration {
            expectation,
            configuration: self,
            kwargs,
        })
    }
}

/// A configuration that passed validation, with defaults filled in.
///
/// There are no mutators; change the source configuration and validate it
/// again instead.
#[derive(Debug, Clone)]
pub struct ValidatedConfiguration {
    expectation: &'static dyn Expectation,
    configuration: ExpectationConfiguration,
    kwargs: Kwargs,
}

impl ValidatedConfiguration {
    /// The expectation implementation.
    pub fn expectation(&self) -> &'static dyn Expectation {
        self.expectation
    }

    /// The configuration as declared.
    pub fn configuration(&self) -> &ExpectationConfiguration {
        &self.configuration
    }

    /// Kwargs with defaults applied.
    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    /// Tolerated success ratio; 1.0 unless set.
    pub fn mostly(&self) -> f64 {
        self.kwargs.get_f64(MOSTLY_KEY).unwrap_or(1.0)
    }

    /// Effective result format.
    ///
    /// The runtime configuration wins over the expectation's own
    /// `result_format`, which wins over `default`.
    pub fn result_format(
        &self,
        runtime: &RuntimeConfiguration,
        default: &ResultFormatConfig,
    ) -> Result<ResultFormatConfig> {
        if let Some(result_format) = &runtime.result_format {
            return Ok(result_format.clone());
        }
        match self.kwargs.get("result_format") {
            Some(value) if !value.is_null() => Ok(ResultFormatConfig::from_value(value)?),
            _ => Ok(default.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResultFormat;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_unset_kwargs() {
        let validated = ExpectationConfiguration::new(
            "expect_column_values_to_be_between",
            Kwargs::new().with("column", "a").with("min_value", 1),
        )
        .validate()
        .unwrap();
        assert_eq!(validated.mostly(), 1.0);
        assert_eq!(validated.kwargs().get_bool("strict_min"), Some(false));
        assert_eq!(validated.kwargs().get_f64("min_value"), Some(1.0));
    }

    #[test]
    fn test_invalid_kwargs_name_the_expectation() {
        let error = ExpectationConfiguration::new(
            "expect_column_values_to_not_be_null",
            Kwargs::new().with("column", "a").with("mostly", -0.1),
        )
        .validate()
        .unwrap_err();
        match error {
            ExpectationsError::InvalidExpectationConfiguration {
                expectation_type, ..
            } => assert_eq!(expectation_type, "expect_column_values_to_not_be_null"),
            other => panic!("unexpected error: {other}"),
        }

        assert!(
            ExpectationConfiguration::new("expect_nothing", Kwargs::new())
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_result_format_precedence() {
        let validated = ExpectationConfiguration::new(
            "expect_column_values_to_not_be_null",
            Kwargs::new().with("column", "a").with("result_format", "SUMMARY"),
        )
        .validate()
        .unwrap();
        let default = ResultFormatConfig::new();

        let own = validated
            .result_format(&RuntimeConfiguration::new(), &default)
            .unwrap();
        assert_eq!(own.result_format, ResultFormat::Summary);

        let runtime = RuntimeConfiguration::new().with_result_format(
            ResultFormatConfig::new().with_result_format(ResultFormat::Complete),
        );
        let overridden = validated.result_format(&runtime, &default).unwrap();
        assert_eq!(overridden.result_format, ResultFormat::Complete);
    }

    #[test]
    fn test_configuration_deserializes() {
        let configuration: ExpectationConfiguration = serde_json::from_value(json!({
            "expectation_type": "expect_column_values_to_be_in_set",
            "kwargs": {"column": "a", "value_set": [1, 2]},
        }))
        .unwrap();
        assert!(configuration.meta.is_empty());
        assert!(configuration.validate().is_ok());
    }
}
