//! In-memory table execution engine.
//!
//! Batches are JSON records held in memory. A compute domain is a
//! [`TableView`]: the batch rows that pass the row filter, with row positions
//! kept so unexpected rows can be reported by index. Every metric is computed
//! directly, so nothing is bundled on this engine.
//!
//! # Loading
//! - Runtime records (a JSON array of objects)
//! - JSON-lines and JSON-array files
//! - Dataframes, converted to records (feature `polars`)

mod data;

pub use data::{TableData, TableView};
pub(crate) use data::json_type_name;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    ComputeDomain, Computed, EngineType, ExecutionEngine, MetricBackend, MetricCall,
    resolve_with_backend, wrong_engine,
};
use crate::batch::{Batch, BatchData, BatchMarkers, BatchSource, BatchSpec, PathFormat};
use crate::domain::{
    BATCH_ID_KEY, Domain, MetricDomainType, MulticolumnIgnoreRowIf, PairIgnoreRowIf,
};
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::{MetricValue, MetricValues, is_missing};
use crate::registry::{MetricFn, MetricRegistration, MetricRegistry, global_registry};
use crate::row_condition::row_filter_from_kwargs;
use crate::{ExpectationsError, Result};

/// Provider function run by the table engine.
pub type TableMetricFn =
    Arc<dyn Fn(&MetricCall<'_, TableExecutionEngine>) -> Result<MetricValue> + Send + Sync>;

#[derive(Debug)]
struct LoadedTable {
    data: Arc<TableData>,
    markers: BatchMarkers,
}

/// Execution engine over in-memory records.
#[derive(Debug)]
pub struct TableExecutionEngine {
    registry: Arc<MetricRegistry>,
    batches: HashMap<String, LoadedTable>,
    active_batch_id: Option<String>,
    round_trips: AtomicUsize,
}

impl Default for TableExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExecutionEngine {
    /// Creates an engine using the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(global_registry())
    }

    /// Creates an engine using the given registry.
    pub fn with_registry(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            batches: HashMap::new(),
            active_batch_id: None,
            round_trips: AtomicUsize::new(0),
        }
    }

    /// Registers pre-built data under a batch id and makes it active.
    pub fn load_batch_data(&mut self, batch_id: impl Into<String>, data: TableData) -> Result<Batch> {
        let batch_id = batch_id.into();
        if batch_id.trim().is_empty() {
            return Err(ExpectationsError::invalid_batch_id("batch_id must not be empty"));
        }
        let markers = BatchMarkers::new();
        tracing::debug!(
            batch_id = %batch_id,
            rows = data.row_count(),
            columns = data.columns().len(),
            "Loaded table batch"
        );
        self.batches.insert(
            batch_id.clone(),
            LoadedTable {
                data: Arc::new(data),
                markers: markers.clone(),
            },
        );
        self.active_batch_id = Some(batch_id.clone());
        Ok(Batch {
            id: batch_id,
            markers,
            source: "runtime_data".to_string(),
        })
    }

    /// Data of a loaded batch.
    pub fn batch_data(&self, batch_id: &str) -> Option<&TableData> {
        self.batches.get(batch_id).map(|b| b.data.as_ref())
    }

    /// Restricts the batch named by the domain kwargs to a compute domain.
    ///
    /// Rows pass when the combined row filter is true; unknown results drop
    /// the row. Pair and multicolumn domains also drop rows per `ignore_row_if`.
    pub fn get_compute_domain(
        &self,
        domain_kwargs: &Kwargs,
        domain_type: MetricDomainType,
    ) -> Result<ComputeDomain<TableView>> {
        let domain = Domain::from_kwargs(domain_kwargs, domain_type)?;
        let split = domain.split();
        let data = self.resolve_batch(&split.compute)?;

        for column in domain.accessor_columns().iter().chain(domain.projection().iter()) {
            if data.column_index(column).is_none() {
                return Err(data::missing_column(column, data.columns()));
            }
        }

        let filter = row_filter_from_kwargs(&split.compute, EngineType::Table)?;
        let mut rows = Vec::with_capacity(data.row_count());
        for row in 0..data.row_count() {
            let keep = match &filter {
                Some(condition) => data::evaluate(condition, &data, row)? == Some(true),
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        match &domain {
            Domain::ColumnPair(pair) => {
                let policy = PairIgnoreRowIf::from_kwargs(&split.compute)?;
                let a = data.column_index(&pair.column_a).unwrap_or_default();
                let b = data.column_index(&pair.column_b).unwrap_or_default();
                rows.retain(|row| {
                    !policy.skips(is_missing(data.value(*row, a)), is_missing(data.value(*row, b)))
                });
            }
            Domain::Multicolumn(multi) => {
                let policy = MulticolumnIgnoreRowIf::from_kwargs(&split.compute)?;
                let indices: Vec<usize> = multi
                    .columns
                    .iter()
                    .filter_map(|c| data.column_index(c))
                    .collect();
                rows.retain(|row| {
                    let missing: Vec<bool> = indices
                        .iter()
                        .map(|i| is_missing(data.value(*row, *i)))
                        .collect();
                    !policy.skips(&missing)
                });
            }
            _ => {}
        }

        Ok(ComputeDomain {
            handle: TableView::new(data, rows, domain.projection()),
            compute_kwargs: split.compute,
            accessor_kwargs: split.accessor,
        })
    }

    /// Data of the batch selected by compute kwargs, without row filtering.
    pub fn resolve_batch(&self, compute_kwargs: &Kwargs) -> Result<Arc<TableData>> {
        let batch_id = match compute_kwargs.get_str(BATCH_ID_KEY) {
            Some(id) => id,
            None => self.active_batch_id.as_deref().ok_or_else(|| {
                ExpectationsError::metric_resolution("no batch loaded and no batch_id given")
            })?,
        };
        self.batches
            .get(batch_id)
            .map(|b| Arc::clone(&b.data))
            .ok_or_else(|| {
                ExpectationsError::metric_resolution(format!("batch '{}' is not loaded", batch_id))
            })
    }

    async fn read_source(source: &BatchSource) -> Result<TableData> {
        match source {
            BatchSource::RuntimeData(spec) => match &spec.batch_data {
                Some(BatchData::Records(records)) => TableData::from_records(records),
                #[cfg(feature = "polars")]
                Some(BatchData::Frame(frame)) => {
                    TableData::from_records(&crate::engine::frame::frame_to_records(frame)?)
                }
                None => Err(ExpectationsError::invalid_batch_spec(
                    "runtime batch requires batch_data",
                )),
            },
            BatchSource::Path(spec) => {
                let format = spec.format.resolve(&spec.path);
                let text = tokio::fs::read_to_string(&spec.path).await.map_err(|e| {
                    ExpectationsError::Io {
                        context: format!("Failed to read batch file {}", spec.path.display()),
                        source: e,
                    }
                })?;
                match format {
                    PathFormat::JsonLines => TableData::from_json_lines(&text),
                    PathFormat::Json => {
                        let records: Value = serde_json::from_str(&text).map_err(|e| {
                            ExpectationsError::Serialization {
                                context: format!("Failed to parse {}", spec.path.display()),
                                source: e,
                            }
                        })?;
                        TableData::from_records(&records)
                    }
                    PathFormat::Csv | PathFormat::Infer => {
                        Err(ExpectationsError::invalid_batch_spec(format!(
                            "table engine reads JSON and JSON-lines files, not {}",
                            spec.path.display()
                        )))
                    }
                }
            }
            other => Err(ExpectationsError::invalid_batch_spec(format!(
                "table engine cannot load {} batches",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl ExecutionEngine for TableExecutionEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Table
    }

    fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    fn active_batch_id(&self) -> Option<&str> {
        self.active_batch_id.as_deref()
    }

    fn batch_markers(&self, batch_id: &str) -> Option<&BatchMarkers> {
        self.batches.get(batch_id).map(|b| &b.markers)
    }

    fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }

    async fn load_batch(&mut self, batch_spec: BatchSpec) -> Result<Batch> {
        batch_spec.validate()?;
        let batch_id = batch_spec.resolve_batch_id()?;
        let data = Self::read_source(&batch_spec.source)
            .await?
            .restricted(batch_spec.partition.as_ref(), batch_spec.sampling.as_ref())?;

        let mut batch = self.load_batch_data(batch_id, data)?;
        batch.source = batch_spec.source.kind().to_string();
        Ok(batch)
    }

    async fn resolve_metrics(
        &self,
        metrics_to_resolve: &[MetricConfiguration],
        already_resolved: &MetricValues,
    ) -> Result<MetricValues> {
        resolve_with_backend(self, metrics_to_resolve, already_resolved).await
    }
}

#[async_trait]
impl MetricBackend for TableExecutionEngine {
    type Partial = Infallible;

    fn backend_type(&self) -> EngineType {
        EngineType::Table
    }

    fn metric_registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    async fn compute(
        &self,
        registration: &MetricRegistration,
        configuration: &MetricConfiguration,
        resolved: &MetricValues,
    ) -> Result<Computed<Infallible>> {
        let provider = match &registration.provider {
            MetricFn::Table(provider) => provider,
            #[allow(unreachable_patterns)]
            _ => return Err(wrong_engine(registration, EngineType::Table)),
        };
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let call = MetricCall {
            engine: self,
            configuration,
            metrics: resolved,
        };
        Ok(Computed::Ready(provider(&call)?))
    }

    async fn flush_bundle(&self, _domain_kwargs: &Kwargs, partials: Vec<Infallible>) -> Result<Vec<Value>> {
        Ok(partials.into_iter().map(|never| match never {}).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with(records: Value) -> TableExecutionEngine {
        let mut engine = TableExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        engine
            .load_batch_data("b1", TableData::from_records(&records).unwrap())
            .unwrap();
        engine
    }

    #[test]
    fn test_compute_domain_without_condition_is_full_batch() {
        let engine = engine_with(json!([{"a": 1}, {"a": null}, {"a": 3}]));
        let domain = engine
            .get_compute_domain(&Kwargs::new(), MetricDomainType::Table)
            .unwrap();
        assert_eq!(domain.handle.row_indices(), [0, 1, 2]);
        assert_eq!(
            domain.handle.records(),
            vec![json!({"a": 1}), json!({"a": null}), json!({"a": 3})]
        );
    }

    #[test]
    fn test_compute_domain_applies_row_condition() {
        let engine = engine_with(json!([{"a": 1, "b": 5}, {"a": 2, "b": 6}, {"a": 3, "b": null}]));
        let kwargs = Kwargs::new()
            .with("column", "a")
            .with("row_condition", "col(\"b\") > 5");
        let domain = engine
            .get_compute_domain(&kwargs, MetricDomainType::Column)
            .unwrap();
        assert_eq!(domain.handle.row_indices(), [1]);
        assert_eq!(domain.accessor_kwargs, Kwargs::new().with("column", "a"));
        assert!(!domain.compute_kwargs.contains_key("column"));
    }

    #[test]
    fn test_pandas_condition_is_accepted() {
        let engine = engine_with(json!([{"a": 1}, {"a": 2}]));
        let kwargs = Kwargs::new()
            .with("row_condition", "a == 2")
            .with("condition_parser", "pandas");
        let domain = engine
            .get_compute_domain(&kwargs, MetricDomainType::Table)
            .unwrap();
        assert_eq!(domain.handle.len(), 1);
    }

    #[test]
    fn test_pair_ignore_row_if() {
        let engine = engine_with(json!([
            {"a": 1, "b": 1}, {"a": null, "b": null}, {"a": null, "b": 2}
        ]));
        let kwargs = Kwargs::new().with("column_A", "a").with("column_B", "b");
        let domain = engine
            .get_compute_domain(&kwargs, MetricDomainType::ColumnPair)
            .unwrap();
        assert_eq!(domain.handle.row_indices(), [0, 2]);

        let either = kwargs.with("ignore_row_if", "either_value_is_missing");
        let domain = engine
            .get_compute_domain(&either, MetricDomainType::ColumnPair)
            .unwrap();
        assert_eq!(domain.handle.row_indices(), [0]);
    }

    #[test]
    fn test_identity_projects_columns() {
        let engine = engine_with(json!([{"a": 1, "b": 2}]));
        let kwargs = Kwargs::new().with("column", "a");
        let domain = engine
            .get_compute_domain(&kwargs, MetricDomainType::Identity)
            .unwrap();
        assert_eq!(domain.handle.records(), vec![json!({"a": 1})]);
        assert!(domain.accessor_kwargs.is_empty());
    }

    #[test]
    fn test_unknown_column_and_batch() {
        let engine = engine_with(json!([{"a": 1}]));
        let err = engine
            .get_compute_domain(&Kwargs::new().with("column", "zzz"), MetricDomainType::Column)
            .unwrap_err();
        assert!(err.to_string().contains("zzz"));

        let err = engine
            .get_compute_domain(&Kwargs::new().with("batch_id", "nope"), MetricDomainType::Table)
            .unwrap_err();
        assert!(matches!(err, ExpectationsError::MetricResolution { .. }));
    }

    #[tokio::test]
    async fn test_load_batch_rejects_sql_specs() {
        let mut engine = TableExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        let err = engine.load_batch(BatchSpec::sql_table("t")).await.unwrap_err();
        assert!(matches!(err, ExpectationsError::InvalidBatchSpec { .. }));
    }

    #[tokio::test]
    async fn test_load_batch_records_sets_active_batch() {
        let mut engine = TableExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        let batch = engine
            .load_batch(BatchSpec::records(json!([{"a": 1}])).with_batch_id("mine"))
            .await
            .unwrap();
        assert_eq!(batch.id, "mine");
        assert_eq!(batch.source, "runtime_data");
        assert_eq!(engine.active_batch_id(), Some("mine"));
        assert!(engine.batch_markers("mine").unwrap().load_time().is_some());
    }
}
