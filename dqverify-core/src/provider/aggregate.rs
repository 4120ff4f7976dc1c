//! Aggregate metric providers.
//!
//! An aggregate reduces its compute domain to one value. The table engine
//! computes it directly. The SQL and dataframe engines register two entries:
//! `<name>.aggregate_fn`, which hands the engine an expression to bundle with
//! every other aggregate on the same compute domain, and `<name>`, which
//! reads the bundled result through its `metric_partial_fn` dependency.

use serde_json::Value;

use super::accessor_columns;
use crate::Result;
use crate::domain::MetricDomainType;
use crate::engine::table::TableView;
use crate::kwargs::Kwargs;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};

#[cfg(any(feature = "sqlite", feature = "polars"))]
use super::{METRIC_PARTIAL_FN, single_dependency};
#[cfg(any(feature = "sqlite", feature = "polars"))]
use crate::metric_value::MetricValue;
#[cfg(feature = "polars")]
use crate::engine::frame::FrameMetricOutcome;
#[cfg(feature = "sqlite")]
use crate::engine::sql::SqlMetricOutcome;
#[cfg(feature = "polars")]
use polars::prelude::Expr;

/// Table engine aggregate over the visible rows; receives the accessor
/// columns and the value kwargs.
pub type TableAggregateFn = fn(&TableView, &[String], &Kwargs) -> Result<Value>;

/// SQL aggregate expression over the accessor columns.
#[cfg(feature = "sqlite")]
pub type SqlAggregateFn = fn(&[String], &Kwargs) -> Result<String>;

/// Dataframe aggregate expression over the accessor columns.
#[cfg(feature = "polars")]
pub type FrameAggregateFn = fn(&[String], &Kwargs) -> Result<Expr>;

/// Static description of an aggregate metric.
///
/// Only table and column domains are supported: the bundled expression runs
/// over the table compute domain, which carries no pair or multicolumn row
/// filtering.
#[derive(Debug)]
pub struct AggregateMetricProvider {
    /// Metric name, e.g. `column.max`
    pub metric_name: &'static str,
    /// Provider identity used for idempotent registration
    pub metric_class: &'static str,
    /// Domain the aggregate reduces
    pub domain_type: MetricDomainType,
    /// Value keys the aggregate reads
    pub value_keys: &'static [&'static str],
    /// Table engine function
    pub table: Option<TableAggregateFn>,
    /// SQL engine expression builder
    #[cfg(feature = "sqlite")]
    pub sql: Option<SqlAggregateFn>,
    /// Dataframe engine expression builder
    #[cfg(feature = "polars")]
    pub frame: Option<FrameAggregateFn>,
}

impl AggregateMetricProvider {
    #[cfg(any(feature = "sqlite", feature = "polars"))]
    fn partial_name(&self) -> String {
        format!("{}.{}", self.metric_name, super::map::AGGREGATE_FN)
    }

    fn registration(
        &self,
        metric_name: String,
        fn_type: MetricFnType,
        provider: MetricFn,
    ) -> MetricRegistration {
        let class = if fn_type == MetricFnType::AggregateFn {
            format!("{}.{}", self.metric_class, super::map::AGGREGATE_FN)
        } else {
            self.metric_class.to_string()
        };
        MetricRegistration::new(metric_name, class, fn_type, self.domain_type, provider)
            .with_value_keys(self.value_keys)
    }

    /// Final value entry reading the bundled partial.
    #[cfg(any(feature = "sqlite", feature = "polars"))]
    fn from_partial(&self, provider: MetricFn) -> MetricRegistration {
        let partial = self.partial_name();
        self.registration(self.metric_name.to_string(), MetricFnType::Value, provider)
            .with_dependencies(single_dependency(METRIC_PARTIAL_FN, move |configuration| {
                configuration.renamed(partial.clone())
            }))
    }

    /// Registers the aggregate for every engine it has a function for.
    pub fn register(&'static self, registry: &MetricRegistry) -> Result<()> {
        if let Some(aggregate) = self.table {
            registry.register_metric(self.registration(
                self.metric_name.to_string(),
                MetricFnType::Value,
                MetricFn::table(move |call| {
                    let domain = call
                        .engine
                        .get_compute_domain(call.domain_kwargs(), self.domain_type)?;
                    let columns = accessor_columns(&domain.accessor_kwargs, self.domain_type)?;
                    Ok(aggregate(&domain.handle, &columns, call.value_kwargs())?.into())
                }),
            ))?;
        }

        #[cfg(feature = "sqlite")]
        if let Some(expression) = self.sql {
            registry.register_metric(self.registration(
                self.partial_name(),
                MetricFnType::AggregateFn,
                MetricFn::sql(move |call| {
                    let domain = call
                        .engine
                        .get_compute_domain(call.domain_kwargs(), self.domain_type)?;
                    let columns = accessor_columns(&domain.accessor_kwargs, self.domain_type)?;
                    Ok(SqlMetricOutcome::Aggregate {
                        expression: expression(&columns, call.value_kwargs())?,
                        domain_kwargs: domain.compute_kwargs,
                    })
                }),
            ))?;
            registry.register_metric(self.from_partial(MetricFn::sql(|call| {
                Ok(SqlMetricOutcome::Value(MetricValue::Json(
                    call.dependency_json(METRIC_PARTIAL_FN)?.clone(),
                )))
            })))?;
        }

        #[cfg(feature = "polars")]
        if let Some(expression) = self.frame {
            registry.register_metric(self.registration(
                self.partial_name(),
                MetricFnType::AggregateFn,
                MetricFn::frame(move |call| {
                    let domain = call
                        .engine
                        .get_compute_domain(call.domain_kwargs(), self.domain_type)?;
                    let columns = accessor_columns(&domain.accessor_kwargs, self.domain_type)?;
                    Ok(FrameMetricOutcome::Aggregate {
                        expression: expression(&columns, call.value_kwargs())?,
                        domain_kwargs: domain.compute_kwargs,
                    })
                }),
            ))?;
            registry.register_metric(self.from_partial(MetricFn::frame(|call| {
                Ok(FrameMetricOutcome::Value(MetricValue::Json(
                    call.dependency_json(METRIC_PARTIAL_FN)?.clone(),
                )))
            })))?;
        }
        Ok(())
    }
}
