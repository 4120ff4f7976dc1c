//! Metric resolution and map-expectation evaluation for dqverify.
//!
//! Users declare expectations about tabular data; this crate resolves the
//! metrics those expectations need against a batch and judges the results.
//! The same metric names resolve on three backends: in-memory JSON tables,
//! SQLite through sqlx, and polars dataframes.
//!
//! # Engine Guarantees
//! - Identical metric configurations are computed once per resolution pass
//! - Aggregates sharing a compute domain are evaluated in one backend round trip
//! - Map conditions of null-filtering metrics never see null rows
//! - Result payloads have the same shape on every backend
//!
//! # Architecture
//! - [`registry`] maps `(metric name, engine)` to providers, which are static
//!   tables in [`metrics`] built on the base types in [`provider`]
//! - [`engine`] plans dependency graphs ([`validation_graph`]) and resolves
//!   them per backend
//! - [`expectations`] turn configurations into metric requests and verdicts;
//!   [`validator`] ties both together
//!
//! # Example
//! ```rust,no_run
//! use dqverify_core::engine::ExecutionEngine;
//! use dqverify_core::engine::table::TableExecutionEngine;
//! use dqverify_core::{BatchSpec, ExpectationConfiguration, Kwargs, Validator};
//! use serde_json::json;
//!
//! # async fn run() -> dqverify_core::Result<()> {
//! let mut validator = Validator::new(TableExecutionEngine::new());
//! validator
//!     .load_batch(BatchSpec::records(json!([{"a": 1}, {"a": null}])))
//!     .await?;
//! let result = validator
//!     .validate_expectation(
//!         &ExpectationConfiguration::new(
//!             "expect_column_values_to_not_be_null",
//!             Kwargs::new().with("column", "a").with("mostly", 0.5),
//!         ),
//!         None,
//!     )
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod expectations;
pub mod kwargs;
pub mod logging;
pub mod metric_configuration;
pub mod metric_value;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod row_condition;
pub mod validation_graph;
pub mod validator;

// Re-export commonly used types
pub use batch::{Batch, BatchData, BatchMarkers, BatchSpec};
pub use config::{
    ResultFormat, ResultFormatConfig, RuntimeConfiguration, SqlEngineConfig, ValidatorConfig,
};
pub use domain::{Domain, MetricDomainType, SplitDomainKwargs};
pub use engine::{EngineType, ExecutionEngine};
pub use error::{ExpectationsError, Result};
pub use expectations::{
    Expectation, ExpectationConfiguration, ExpectationValidationResult, SuiteValidationResult,
};
pub use kwargs::Kwargs;
pub use metric_configuration::{MetricConfiguration, MetricId};
pub use metric_value::{MetricValue, MetricValues};
pub use registry::{MetricRegistry, global_registry, reset_registry};
pub use validator::Validator;
