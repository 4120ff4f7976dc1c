//! Execution engines.
//!
//! Each backend implements [`ExecutionEngine`]: it loads batches, builds
//! compute domains and resolves metric configurations through the metric
//! registry. Resolution itself is shared. [`resolve_with_backend`] plans the
//! dependency graph, calls providers level by level, and flushes aggregate
//! partials that share a compute domain as one backend round trip.
//!
//! # Engines
//! - [`table::TableExecutionEngine`]: JSON records held in memory
//! - `sql::SqlExecutionEngine`: SQLite through sqlx (feature `sqlite`)
//! - `frame::FrameExecutionEngine`: polars dataframes (feature `polars`)

pub mod table;

#[cfg(feature = "sqlite")]
pub mod sql;

#[cfg(feature = "polars")]
pub mod frame;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::batch::{Batch, BatchMarkers, BatchSpec};
use crate::kwargs::Kwargs;
use crate::metric_configuration::{MetricConfiguration, MetricId};
use crate::metric_value::{MetricValue, MetricValues};
use crate::registry::{MetricRegistration, MetricRegistry};
use crate::validation_graph::ValidationGraph;
use crate::{ExpectationsError, Result};

/// Backend family of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineType {
    /// In-memory JSON records
    Table,
    /// SQL store
    Sql,
    /// Dataframe engine
    Frame,
}

impl EngineType {
    /// All engine types.
    pub const ALL: [EngineType; 3] = [EngineType::Table, EngineType::Sql, EngineType::Frame];

    /// Engine name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "TableExecutionEngine",
            Self::Sql => "SqlExecutionEngine",
            Self::Frame => "FrameExecutionEngine",
        }
    }

    /// Returns true if rows keep a stable index that can be reported.
    pub fn supports_row_index(&self) -> bool {
        matches!(self, Self::Table | Self::Frame)
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend handle restricted to a domain, plus the kwargs split.
#[derive(Debug, Clone)]
pub struct ComputeDomain<H> {
    /// Backend-native handle with row filters applied
    pub handle: H,
    /// Kwargs consumed while building the handle
    pub compute_kwargs: Kwargs,
    /// Kwargs the provider uses to select columns
    pub accessor_kwargs: Kwargs,
}

/// Everything a provider sees when it computes one metric.
pub struct MetricCall<'a, E> {
    /// Engine computing the metric
    pub engine: &'a E,
    /// Metric being computed, with dependencies attached
    pub configuration: &'a MetricConfiguration,
    /// Values resolved so far
    pub metrics: &'a MetricValues,
}

impl<E> MetricCall<'_, E> {
    /// Domain kwargs of the metric.
    pub fn domain_kwargs(&self) -> &Kwargs {
        &self.configuration.metric_domain_kwargs
    }

    /// Value kwargs of the metric.
    pub fn value_kwargs(&self) -> &Kwargs {
        &self.configuration.metric_value_kwargs
    }

    /// Name of the metric being computed.
    pub fn metric_name(&self) -> &str {
        &self.configuration.metric_name
    }

    /// Resolved value of a named dependency.
    pub fn dependency(&self, name: &str) -> Result<&MetricValue> {
        let dependency = self
            .configuration
            .metric_dependencies
            .get(name)
            .ok_or_else(|| {
                ExpectationsError::metric_resolution(format!(
                    "{} has no dependency named '{}'",
                    self.configuration.metric_name, name
                ))
            })?;
        let id = dependency.id();
        self.metrics.get(&id).ok_or_else(|| {
            ExpectationsError::metric_resolution(format!(
                "dependency {} of {} is not resolved",
                id, self.configuration.metric_name
            ))
        })
    }

    /// Resolved plain value of a named dependency.
    pub fn dependency_json(&self, name: &str) -> Result<&Value> {
        self.dependency(name)?.expect_json(name)
    }
}

/// Common contract of all execution engines.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Backend family.
    fn engine_type(&self) -> EngineType;

    /// Registry providers are looked up in.
    fn registry(&self) -> &Arc<MetricRegistry>;

    /// Id of the batch used when domain kwargs carry no `batch_id`.
    fn active_batch_id(&self) -> Option<&str>;

    /// Markers of a loaded batch.
    fn batch_markers(&self, batch_id: &str) -> Option<&BatchMarkers>;

    /// Number of backend round trips issued so far.
    fn round_trips(&self) -> usize;

    /// Loads a batch and makes it the active batch.
    async fn load_batch(&mut self, batch_spec: BatchSpec) -> Result<Batch>;

    /// Resolves metrics, expanding and resolving missing dependencies first.
    ///
    /// Returns the values computed by this call; entries of
    /// `already_resolved` are reused and not recomputed.
    async fn resolve_metrics(
        &self,
        metrics_to_resolve: &[MetricConfiguration],
        already_resolved: &MetricValues,
    ) -> Result<MetricValues>;
}

/// Outcome of one provider call.
pub(crate) enum Computed<P> {
    /// Value is final
    Ready(MetricValue),
    /// Value is a partial to be flushed with others on the same domain
    Bundled { domain_kwargs: Kwargs, partial: P },
}

/// Backend hooks used by the shared resolution driver.
#[async_trait]
pub(crate) trait MetricBackend: Send + Sync {
    /// Deferred aggregate representation.
    type Partial: Send + Sync;

    fn backend_type(&self) -> EngineType;

    fn metric_registry(&self) -> &Arc<MetricRegistry>;

    /// Calls the provider for one metric.
    async fn compute(
        &self,
        registration: &MetricRegistration,
        configuration: &MetricConfiguration,
        resolved: &MetricValues,
    ) -> Result<Computed<Self::Partial>>;

    /// Evaluates all partials of one compute domain in a single round trip.
    async fn flush_bundle(
        &self,
        domain_kwargs: &Kwargs,
        partials: Vec<Self::Partial>,
    ) -> Result<Vec<Value>>;
}

struct PendingBundle<P> {
    domain_kwargs: Kwargs,
    entries: Vec<(MetricId, P)>,
}

/// Resolves metrics on a backend in dependency order.
pub(crate) async fn resolve_with_backend<B: MetricBackend>(
    backend: &B,
    metrics_to_resolve: &[MetricConfiguration],
    already_resolved: &MetricValues,
) -> Result<MetricValues> {
    let engine = backend.backend_type();
    let mut graph = ValidationGraph::new(Arc::clone(backend.metric_registry()), engine);
    for configuration in metrics_to_resolve {
        graph.add_metric(configuration.clone(), already_resolved)?;
    }
    let levels = graph.resolution_levels()?;
    tracing::debug!(
        engine = %engine,
        metrics = graph.len(),
        phases = levels.len(),
        "Planned metric resolution"
    );

    let mut working = already_resolved.clone();
    let mut computed_ids = HashSet::new();

    for level in levels {
        let mut bundles: BTreeMap<String, PendingBundle<B::Partial>> = BTreeMap::new();

        for id in level {
            let Some(node) = graph.node(&id) else {
                continue;
            };
            tracing::trace!(engine = %engine, metric = %id, "Computing metric");
            let outcome = backend
                .compute(&node.registration, &node.configuration, &working)
                .await
                .map_err(|e| provider_error(&node.configuration.metric_name, e))?;

            match outcome {
                Computed::Ready(value) => {
                    working.insert(id.clone(), value);
                    computed_ids.insert(id);
                }
                Computed::Bundled {
                    domain_kwargs,
                    partial,
                } => {
                    bundles
                        .entry(domain_kwargs.to_id())
                        .or_insert_with(|| PendingBundle {
                            domain_kwargs,
                            entries: Vec::new(),
                        })
                        .entries
                        .push((id, partial));
                }
            }
        }

        for (domain_id, bundle) in bundles {
            let (ids, partials): (Vec<MetricId>, Vec<B::Partial>) =
                bundle.entries.into_iter().unzip();
            let names = ids
                .iter()
                .map(|id| id.metric_name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let values = backend
                .flush_bundle(&bundle.domain_kwargs, partials)
                .await
                .map_err(|e| provider_error(&names, e))?;
            if values.len() != ids.len() {
                return Err(ExpectationsError::metric_resolution(format!(
                    "{} returned {} values for {} bundled metrics",
                    engine,
                    values.len(),
                    ids.len()
                )));
            }
            tracing::debug!(
                engine = %engine,
                domain_id = %domain_id,
                "{} computed {} metrics on domain_id {}",
                engine,
                ids.len(),
                domain_id
            );
            for (id, value) in ids.into_iter().zip(values) {
                working.insert(id.clone(), MetricValue::Json(value));
                computed_ids.insert(id);
            }
        }
    }

    working.retain(|id, _| computed_ids.contains(id));
    Ok(working)
}

/// Wraps provider failures; passthrough errors keep their kind.
fn provider_error(metric_name: &str, error: ExpectationsError) -> ExpectationsError {
    if error.is_passthrough() {
        error
    } else {
        ExpectationsError::provider_failed(metric_name, error)
    }
}

/// Error for a provider registered for a different engine than the caller.
pub(crate) fn wrong_engine(registration: &MetricRegistration, engine: EngineType) -> ExpectationsError {
    ExpectationsError::metric_provider(registration.metric_name.clone(), engine)
}
