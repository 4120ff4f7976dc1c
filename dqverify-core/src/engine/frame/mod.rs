//! Polars dataframe execution engine.
//!
//! Batches are collected dataframes. A compute domain is a [`FrameDomain`]:
//! the batch as a lazy frame carrying a `__row_index` column, plus the row
//! filter as an expression kept separate so aggregates can embed it.
//! Aggregate expressions sharing a compute domain are evaluated by one
//! `select` and one collect.

mod convert;

pub use convert::{
    any_value_to_json, condition_to_expr, frame_rows, missing_expr, frame_to_records, json_literal,
    records_to_frame, series_to_json,
};

use async_trait::async_trait;
use polars::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    ComputeDomain, Computed, EngineType, ExecutionEngine, MetricBackend, MetricCall,
    resolve_with_backend, wrong_engine,
};
use crate::batch::{Batch, BatchData, BatchMarkers, BatchSource, BatchSpec, PathFormat, Partition, Sampling};
use crate::domain::{
    BATCH_ID_KEY, Domain, MetricDomainType, MulticolumnIgnoreRowIf, PairIgnoreRowIf,
};
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::{MetricValue, MetricValues};
use crate::registry::{MetricFn, MetricRegistration, MetricRegistry, global_registry};
use crate::row_condition::row_filter_from_kwargs;
use crate::{ExpectationsError, Result};

/// Column holding each row's position in the loaded batch.
pub const ROW_INDEX_COLUMN: &str = "__row_index";

const PREDICATE_COLUMN: &str = "__predicate";

/// Provider function run by the dataframe engine.
pub type FrameMetricFn =
    Arc<dyn Fn(&MetricCall<'_, FrameExecutionEngine>) -> Result<FrameMetricOutcome> + Send + Sync>;

/// What a dataframe provider asks the engine to do.
#[derive(Debug)]
pub enum FrameMetricOutcome {
    /// Value computed by the provider
    Value(MetricValue),
    /// Aggregate expression, bundled with others on the same compute domain
    Aggregate {
        /// Expression producing one value over the domain
        expression: Expr,
        /// Compute domain kwargs the expression runs against
        domain_kwargs: Kwargs,
    },
}

/// A batch restricted to a domain.
#[derive(Clone)]
pub struct FrameDomain {
    base: LazyFrame,
    filter: Option<Expr>,
    projection: Vec<String>,
}

impl FrameDomain {
    /// Row filter of the domain, if any.
    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    /// `predicate` restricted to the rows of the domain.
    pub fn restrict(&self, predicate: Expr) -> Expr {
        match &self.filter {
            Some(filter) => filter.clone().and(predicate),
            None => predicate,
        }
    }

    /// Rows of the domain, projected for identity domains.
    pub fn frame(&self) -> LazyFrame {
        let filtered = match &self.filter {
            Some(filter) => self.base.clone().filter(filter.clone()),
            None => self.base.clone(),
        };
        if self.projection.is_empty() {
            return filtered;
        }
        let mut columns: Vec<Expr> = self.projection.iter().map(|c| col(c)).collect();
        columns.push(col(ROW_INDEX_COLUMN));
        filtered.select(columns)
    }

    /// Rows of the domain for which `predicate` is true.
    ///
    /// The predicate is materialized as a column before filtering so window
    /// expressions only see the domain rows.
    pub fn rows_where(&self, predicate: Expr) -> LazyFrame {
        self.frame()
            .with_column(predicate.alias(PREDICATE_COLUMN))
            .filter(col(PREDICATE_COLUMN))
    }
}

impl std::fmt::Debug for FrameDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDomain")
            .field("filter", &self.filter)
            .field("projection", &self.projection)
            .finish()
    }
}

#[derive(Debug)]
struct LoadedFrame {
    frame: DataFrame,
    markers: BatchMarkers,
}

/// Execution engine over polars dataframes.
#[derive(Debug)]
pub struct FrameExecutionEngine {
    registry: Arc<MetricRegistry>,
    batches: HashMap<String, LoadedFrame>,
    active_batch_id: Option<String>,
    round_trips: AtomicUsize,
}

impl Default for FrameExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExecutionEngine {
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

    /// Dataframe of a loaded batch.
    pub fn batch_frame(&self, batch_id: &str) -> Option<&DataFrame> {
        self.batches.get(batch_id).map(|b| &b.frame)
    }

    /// Schema of the batch selected by compute kwargs.
    pub fn batch_schema(&self, compute_kwargs: &Kwargs) -> Result<Schema> {
        Ok(self.resolve_batch(compute_kwargs)?.schema())
    }

    /// Column names of the batch selected by compute kwargs.
    pub fn batch_column_names(&self, compute_kwargs: &Kwargs) -> Result<Vec<String>> {
        Ok(self
            .resolve_batch(compute_kwargs)?
            .get_column_names()
            .iter()
            .map(|name| (*name).to_string())
            .collect())
    }

    /// Collects a lazy frame, counting the round trip.
    pub fn collect(&self, frame: LazyFrame) -> Result<DataFrame> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        frame
            .collect()
            .map_err(|e| ExpectationsError::frame_failed("Failed to evaluate dataframe query", e))
    }

    /// Restricts the batch named by the domain kwargs to a compute domain.
    ///
    /// Rows where the row filter is null are dropped, like rows where it is
    /// false.
    pub fn get_compute_domain(
        &self,
        domain_kwargs: &Kwargs,
        domain_type: MetricDomainType,
    ) -> Result<ComputeDomain<FrameDomain>> {
        let domain = Domain::from_kwargs(domain_kwargs, domain_type)?;
        let split = domain.split();
        let frame = self.resolve_batch(&split.compute)?;

        let names = frame.get_column_names();
        let projection = domain.projection();
        for column in domain.accessor_columns().iter().chain(projection.iter()) {
            if !names.iter().any(|name| *name == column.as_str()) {
                return Err(ExpectationsError::metric_resolution(format!(
                    "column '{}' not found in batch; available columns: [{}]",
                    column,
                    names.join(", ")
                )));
            }
        }

        let mut filters: Vec<Expr> = Vec::new();
        if let Some(condition) = row_filter_from_kwargs(&split.compute, EngineType::Frame)? {
            filters.push(condition_to_expr(&condition, &frame.schema()));
        }

        match &domain {
            Domain::ColumnPair(pair) => {
                let (a, b) = (col(&pair.column_a).is_null(), col(&pair.column_b).is_null());
                match PairIgnoreRowIf::from_kwargs(&split.compute)? {
                    PairIgnoreRowIf::BothValuesAreMissing => filters.push(a.and(b).not()),
                    PairIgnoreRowIf::EitherValueIsMissing => filters.push(a.or(b).not()),
                    PairIgnoreRowIf::Neither => {}
                }
            }
            Domain::Multicolumn(multi) => {
                let nulls = multi.columns.iter().map(|c| col(c).is_null());
                match MulticolumnIgnoreRowIf::from_kwargs(&split.compute)? {
                    MulticolumnIgnoreRowIf::AllValuesAreMissing => {
                        if let Some(all) = nulls.reduce(|acc, e| acc.and(e)) {
                            filters.push(all.not());
                        }
                    }
                    MulticolumnIgnoreRowIf::AnyValueIsMissing => {
                        if let Some(any) = nulls.reduce(|acc, e| acc.or(e)) {
                            filters.push(any.not());
                        }
                    }
                    MulticolumnIgnoreRowIf::Never => {}
                }
            }
            _ => {}
        }

        let base = frame.clone().lazy().with_row_index(ROW_INDEX_COLUMN, None);
        Ok(ComputeDomain {
            handle: FrameDomain {
                base,
                filter: filters.into_iter().reduce(|acc, e| acc.and(e)),
                projection,
            },
            compute_kwargs: split.compute,
            accessor_kwargs: split.accessor,
        })
    }

    fn resolve_batch(&self, compute_kwargs: &Kwargs) -> Result<&DataFrame> {
        let batch_id = match compute_kwargs.get_str(BATCH_ID_KEY) {
            Some(id) => id,
            None => self.active_batch_id.as_deref().ok_or_else(|| {
                ExpectationsError::metric_resolution("no batch loaded and no batch_id given")
            })?,
        };
        self.batches.get(batch_id).map(|b| &b.frame).ok_or_else(|| {
            ExpectationsError::metric_resolution(format!("batch '{}' is not loaded", batch_id))
        })
    }

    async fn read_source(source: &BatchSource) -> Result<DataFrame> {
        match source {
            BatchSource::RuntimeData(spec) => match &spec.batch_data {
                Some(BatchData::Frame(frame)) => Ok(frame.clone()),
                Some(BatchData::Records(records)) => records_to_frame(records),
                None => Err(ExpectationsError::invalid_batch_spec(
                    "runtime batch requires batch_data",
                )),
            },
            BatchSource::Path(spec) => match spec.format.resolve(&spec.path) {
                PathFormat::Csv => LazyCsvReader::new(&spec.path)
                    .with_has_header(true)
                    .finish()
                    .and_then(LazyFrame::collect)
                    .map_err(|e| {
                        ExpectationsError::frame_failed(
                            format!("Failed to read CSV file {}", spec.path.display()),
                            e,
                        )
                    }),
                format @ (PathFormat::Json | PathFormat::JsonLines) => {
                    let text = tokio::fs::read_to_string(&spec.path).await.map_err(|e| {
                        ExpectationsError::Io {
                            context: format!("Failed to read batch file {}", spec.path.display()),
                            source: e,
                        }
                    })?;
                    let parse = |s: &str| {
                        serde_json::from_str::<Value>(s).map_err(|e| ExpectationsError::Serialization {
                            context: format!("Failed to parse {}", spec.path.display()),
                            source: e,
                        })
                    };
                    let records = if format == PathFormat::Json {
                        parse(&text)?
                    } else {
                        Value::Array(
                            text.lines()
                                .filter(|line| !line.trim().is_empty())
                                .map(parse)
                                .collect::<Result<Vec<_>>>()?,
                        )
                    };
                    records_to_frame(&records)
                }
                PathFormat::Infer => Err(ExpectationsError::invalid_batch_spec(format!(
                    "cannot infer the format of {}",
                    spec.path.display()
                ))),
            },
            other => Err(ExpectationsError::invalid_batch_spec(format!(
                "dataframe engine cannot load {} batches",
                other.kind()
            ))),
        }
    }
}

/// Applies partitioning and sampling to a loaded frame.
fn restricted(
    frame: DataFrame,
    partition: Option<&Partition>,
    sampling: Option<&Sampling>,
) -> Result<DataFrame> {
    if partition.is_none() && sampling.is_none() {
        return Ok(frame);
    }
    for column in partition
        .map(|Partition::ColumnValue { column, .. }| column)
        .into_iter()
        .chain(match sampling {
            Some(Sampling::Mod { column, .. }) => Some(column),
            _ => None,
        })
    {
        if frame.column(column).is_err() {
            return Err(ExpectationsError::invalid_batch_spec(format!(
                "column '{}' is not in the batch",
                column
            )));
        }
    }

    let mut lazy = frame.lazy();
    if let Some(Partition::ColumnValue { column, value }) = partition {
        lazy = lazy.filter(match value {
            Value::Null => col(column).is_null(),
            other => col(column).eq(json_literal(other)),
        });
    }
    match sampling {
        #[allow(clippy::cast_possible_truncation)]
        Some(Sampling::Limit { n }) => lazy = lazy.limit(*n as IdxSize),
        Some(Sampling::Mod {
            column,
            modulo,
            value,
        }) => {
            let remainder = ((col(column) % lit(*modulo)) + lit(*modulo)) % lit(*modulo);
            lazy = lazy.filter(remainder.eq(lit(*value)));
        }
        None => {}
    }
    lazy.collect()
        .map_err(|e| ExpectationsError::frame_failed("Failed to sample batch", e))
}

#[async_trait]
impl ExecutionEngine for FrameExecutionEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Frame
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
        let frame = restricted(
            Self::read_source(&batch_spec.source).await?,
            batch_spec.partition.as_ref(),
            batch_spec.sampling.as_ref(),
        )?;
        if frame.column(ROW_INDEX_COLUMN).is_ok() {
            return Err(ExpectationsError::invalid_batch_spec(format!(
                "column name '{}' is reserved",
                ROW_INDEX_COLUMN
            )));
        }

        let markers = BatchMarkers::new();
        tracing::debug!(
            batch_id = %batch_id,
            rows = frame.height(),
            columns = frame.width(),
            "Loaded dataframe batch"
        );
        self.batches.insert(
            batch_id.clone(),
            LoadedFrame {
                frame,
                markers: markers.clone(),
            },
        );
        self.active_batch_id = Some(batch_id.clone());

        Ok(Batch {
            id: batch_id,
            markers,
            source: batch_spec.source.kind().to_string(),
        })
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
impl MetricBackend for FrameExecutionEngine {
    type Partial = Expr;

    fn backend_type(&self) -> EngineType {
        EngineType::Frame
    }

    fn metric_registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    async fn compute(
        &self,
        registration: &MetricRegistration,
        configuration: &MetricConfiguration,
        resolved: &MetricValues,
    ) -> Result<Computed<Expr>> {
        let provider = match &registration.provider {
            MetricFn::Frame(provider) => provider,
            #[allow(unreachable_patterns)]
            _ => return Err(wrong_engine(registration, EngineType::Frame)),
        };
        let outcome = provider(&MetricCall {
            engine: self,
            configuration,
            metrics: resolved,
        })?;

        match outcome {
            FrameMetricOutcome::Value(value) => Ok(Computed::Ready(value)),
            FrameMetricOutcome::Aggregate {
                expression,
                domain_kwargs,
            } => Ok(Computed::Bundled {
                domain_kwargs,
                partial: expression,
            }),
        }
    }

    async fn flush_bundle(&self, domain_kwargs: &Kwargs, partials: Vec<Expr>) -> Result<Vec<Value>> {
        let domain = self.get_compute_domain(domain_kwargs, MetricDomainType::Table)?;
        let expressions: Vec<Expr> = partials
            .into_iter()
            .enumerate()
            .map(|(i, expression)| expression.alias(&format!("m{}", i)))
            .collect();
        let result = self.collect(domain.handle.frame().select(expressions))?;
        if result.height() != 1 {
            return Err(ExpectationsError::metric_resolution(format!(
                "aggregate select returned {} rows",
                result.height()
            )));
        }
        result
            .get_columns()
            .iter()
            .map(|series| {
                series
                    .get(0)
                    .map(any_value_to_json)
                    .map_err(|e| ExpectationsError::frame_failed("Failed to read aggregate", e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn engine_with(records: Value) -> FrameExecutionEngine {
        let mut engine = FrameExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        engine
            .load_batch(BatchSpec::records(records).with_batch_id("b1"))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_compute_domain_keeps_row_positions() {
        let engine = engine_with(json!([{"a": 1, "b": 5}, {"a": 2, "b": 6}, {"a": 3, "b": null}])).await;
        let domain = engine
            .get_compute_domain(
                &Kwargs::new()
                    .with("column", "a")
                    .with("row_condition", "b > 5")
                    .with("condition_parser", "spark"),
                MetricDomainType::Column,
            )
            .unwrap();
        let frame = engine.collect(domain.handle.frame()).unwrap();
        let rows = series_to_json(frame.column(ROW_INDEX_COLUMN).unwrap()).unwrap();
        assert_eq!(rows, vec![json!(1)]);
        assert_eq!(engine.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_multicolumn_ignore_row_if() {
        let engine = engine_with(json!([
            {"a": 1, "b": 1}, {"a": null, "b": null}, {"a": null, "b": 2}
        ]))
        .await;
        let kwargs = Kwargs::new()
            .with("column_list", vec!["a", "b"])
            .with("ignore_row_if", "any_value_is_missing");
        let domain = engine
            .get_compute_domain(&kwargs, MetricDomainType::Multicolumn)
            .unwrap();
        assert_eq!(engine.collect(domain.handle.frame()).unwrap().height(), 1);
    }

    #[tokio::test]
    async fn test_pandas_parser_rejected() {
        let engine = engine_with(json!([{"a": 1}])).await;
        let err = engine
            .get_compute_domain(
                &Kwargs::new()
                    .with("row_condition", "a > 1")
                    .with("condition_parser", "pandas"),
                MetricDomainType::Table,
            )
            .unwrap_err();
        assert!(matches!(err, ExpectationsError::UnsupportedConditionParser { .. }));
    }

    #[tokio::test]
    async fn test_sampling_and_partition() {
        let mut engine = FrameExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        let records = json!([
            {"g": "x", "n": 1}, {"g": "y", "n": 2}, {"g": "x", "n": 3}, {"g": "x", "n": 4}
        ]);
        engine
            .load_batch(
                BatchSpec::records(records)
                    .with_batch_id("p")
                    .with_partition(Partition::ColumnValue {
                        column: "g".into(),
                        value: json!("x"),
                    })
                    .with_sampling(Sampling::Mod {
                        column: "n".into(),
                        modulo: 2,
                        value: 1,
                    }),
            )
            .await
            .unwrap();
        assert_eq!(engine.batch_frame("p").unwrap().height(), 2);
    }

    #[tokio::test]
    async fn test_csv_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,x\n2,y\n").unwrap();

        let mut engine = FrameExecutionEngine::with_registry(Arc::new(MetricRegistry::new()));
        let batch = engine.load_batch(BatchSpec::path(&path)).await.unwrap();
        assert_eq!(batch.source, "path");
        assert_eq!(engine.batch_frame(&batch.id).unwrap().height(), 2);
    }
}
