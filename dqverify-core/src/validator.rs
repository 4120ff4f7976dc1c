//! Validator: evaluates expectation configurations against an engine.
//!
//! The validator is a thin caller. It validates each configuration, collects
//! the metric dependencies of every expectation into one resolution request,
//! and hands the resolved values back to the expectations for judgement.
//!
//! # Error Attribution
//! - Configuration errors reject the whole call before any metric is
//!   resolved, whatever `catch_exceptions` says
//! - When the shared resolution fails, each expectation's dependencies are
//!   resolved on their own, reusing what already succeeded, so a failing
//!   metric only fails the expectations that need it
//! - With `catch_exceptions` errors become `exception_info`; otherwise the
//!   first error is returned

use std::collections::HashSet;

use crate::batch::{Batch, BatchSpec};
use crate::config::{ResultFormatConfig, RuntimeConfiguration, ValidatorConfig};
use crate::engine::ExecutionEngine;
use crate::expectations::{
    ExpectationConfiguration, ExpectationValidationResult, ResolvedMetrics,
    SuiteValidationResult, ValidatedConfiguration, ValidationDependencies,
};
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::MetricValues;
use crate::{ExpectationsError, Result};

/// One expectation ready for resolution.
#[derive(Debug)]
struct Planned {
    validated: ValidatedConfiguration,
    result_format: ResultFormatConfig,
    dependencies: ValidationDependencies,
}

/// Evaluates expectations against the batches of one engine.
#[derive(Debug)]
pub struct Validator<E> {
    engine: E,
    config: ValidatorConfig,
}

impl<E: ExecutionEngine> Validator<E> {
    /// Creates a validator with default configuration.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            config: ValidatorConfig::default(),
        }
    }

    /// Builder method to set the validator configuration.
    pub fn with_config(mut self, config: ValidatorConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Mutable access to the wrapped engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Loads a batch into the engine and makes it active.
    pub async fn load_batch(&mut self, batch_spec: BatchSpec) -> Result<Batch> {
        self.engine.load_batch(batch_spec).await
    }

    /// Evaluates one expectation.
    pub async fn validate_expectation(
        &self,
        configuration: &ExpectationConfiguration,
        runtime: Option<&RuntimeConfiguration>,
    ) -> Result<ExpectationValidationResult> {
        self.graph_validate(std::slice::from_ref(configuration), runtime)
            .await?
            .pop()
            .ok_or_else(|| ExpectationsError::metric_resolution("validation produced no result"))
    }

    /// Evaluates several expectations, resolving their metrics together.
    ///
    /// Results come back in input order.
    pub async fn graph_validate(
        &self,
        configurations: &[ExpectationConfiguration],
        runtime: Option<&RuntimeConfiguration>,
    ) -> Result<Vec<ExpectationValidationResult>> {
        let runtime = runtime.unwrap_or(&self.config.runtime);
        let engine_type = self.engine.engine_type();

        let validated = configurations
            .iter()
            .map(|configuration| configuration.clone().validate())
            .collect::<Result<Vec<_>>>()?;

        let mut plans: Vec<std::result::Result<Planned, ExpectationsError>> =
            Vec::with_capacity(configurations.len());
        for validated in validated {
            match self.plan(validated, runtime) {
                Ok(plan) => plans.push(Ok(plan)),
                Err(error) if runtime.catch_exceptions => plans.push(Err(error)),
                Err(error) => return Err(error),
            }
        }

        let request = union_of(plans.iter().filter_map(|p| p.as_ref().ok()));
        tracing::debug!(
            engine = %engine_type,
            expectations = configurations.len(),
            metrics = request.len(),
            "Resolving validation dependencies"
        );

        let mut resolved = MetricValues::new();
        let mut failures: Vec<Option<ExpectationsError>> =
            std::iter::repeat_with(|| None).take(plans.len()).collect();
        match self.engine.resolve_metrics(&request, &resolved).await {
            Ok(values) => resolved = values,
            Err(error) => {
                tracing::debug!(
                    engine = %engine_type,
                    error = %error,
                    "Shared resolution failed; resolving expectations one at a time"
                );
                for (index, plan) in plans.iter().enumerate() {
                    let Ok(plan) = plan else {
                        continue;
                    };
                    let metrics: Vec<MetricConfiguration> =
                        plan.dependencies.values().cloned().collect();
                    match self.engine.resolve_metrics(&metrics, &resolved).await {
                        Ok(values) => resolved.extend(values),
                        Err(error) if runtime.catch_exceptions => failures[index] = Some(error),
                        Err(error) => return Err(error),
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(plans.len());
        for ((configuration, plan), failure) in configurations.iter().zip(plans).zip(failures) {
            let outcome = match (plan, failure) {
                (Err(error), _) | (Ok(_), Some(error)) => Err(error),
                (Ok(plan), None) => judge(&plan, &resolved, engine_type),
            };
            let result = match outcome {
                Ok(result) => result,
                Err(error) if runtime.catch_exceptions => {
                    tracing::warn!(
                        expectation_type = %configuration.expectation_type,
                        error = %error,
                        "Expectation raised an error"
                    );
                    ExpectationValidationResult::from_error(&error)
                }
                Err(error) => return Err(error),
            };
            results.push(if runtime.include_config {
                result.with_config(configuration)
            } else {
                result
            });
        }
        Ok(results)
    }

    /// Evaluates a suite and tallies the results.
    pub async fn validate_suite(
        &self,
        configurations: &[ExpectationConfiguration],
        runtime: Option<&RuntimeConfiguration>,
    ) -> Result<SuiteValidationResult> {
        let results = self.graph_validate(configurations, runtime).await?;
        let suite = SuiteValidationResult::from_results(results);
        tracing::info!(
            evaluated = suite.statistics.evaluated_expectations,
            successful = suite.statistics.successful_expectations,
            success = suite.success,
            "Validated expectation suite"
        );
        Ok(suite)
    }

    fn plan(
        &self,
        validated: ValidatedConfiguration,
        runtime: &RuntimeConfiguration,
    ) -> Result<Planned> {
        let result_format =
            validated.result_format(runtime, &self.config.default_result_format)?;
        let dependencies = validated.expectation().get_validation_dependencies(
            &validated,
            &result_format,
            self.engine.engine_type(),
        )?;
        Ok(Planned {
            validated,
            result_format,
            dependencies,
        })
    }
}

/// Deduplicated metric request covering every plan.
fn union_of<'p>(plans: impl Iterator<Item = &'p Planned>) -> Vec<MetricConfiguration> {
    let mut seen = HashSet::new();
    plans
        .flat_map(|plan| plan.dependencies.values())
        .filter(|configuration| seen.insert(configuration.id()))
        .cloned()
        .collect()
}

fn judge(
    plan: &Planned,
    resolved: &MetricValues,
    engine_type: crate::engine::EngineType,
) -> Result<ExpectationValidationResult> {
    let mut metrics = ResolvedMetrics::new();
    for (name, configuration) in &plan.dependencies {
        let value = resolved.get(&configuration.id()).ok_or_else(|| {
            ExpectationsError::metric_resolution(format!("{} was not resolved", configuration))
        })?;
        metrics.insert(name.clone(), value.to_json());
    }
    let outcome = plan.validated.expectation().validate(
        &plan.validated,
        &plan.result_format,
        &metrics,
        engine_type,
    )?;
    ExpectationValidationResult::new(outcome.success, outcome.result)
}
