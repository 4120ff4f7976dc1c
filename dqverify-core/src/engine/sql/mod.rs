//! SQLite execution engine.
//!
//! Batches are tables, or queries materialized into temporary tables. A
//! compute domain is a [`SqlSelectable`]: the batch `FROM` target plus the
//! row filter lowered to SQL. Aggregate partials that share a compute domain
//! are evaluated together as one `SELECT`.
//!
//! # Connection Strings
//! - File-based: `sqlite:///path/to/database.db` or a bare `*.db` path
//! - In-memory: `sqlite::memory:` or `:memory:`
//!
//! # Connection Handling
//! - The pool keeps its connections open for the engine's lifetime, so
//!   in-memory databases and temporary tables survive between queries
//! - Every statement runs under the configured statement timeout
//! - Connection strings are redacted before they reach logs or errors

mod selectable;

pub use selectable::{SqlRecord, SqlSelectable, condition_to_sql, quote_identifier, sql_literal};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Executor, TypeInfo};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    ComputeDomain, Computed, EngineType, ExecutionEngine, MetricBackend, MetricCall,
    resolve_with_backend, wrong_engine,
};
use crate::batch::{Batch, BatchMarkers, BatchSource, BatchSpec, Partition, Sampling};
use crate::config::SqlEngineConfig;
use crate::domain::{
    BATCH_ID_KEY, Domain, MetricDomainType, MulticolumnIgnoreRowIf, PairIgnoreRowIf,
};
use crate::error::redact_database_url;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::{MetricValue, MetricValues};
use crate::registry::{MetricFn, MetricRegistration, MetricRegistry, global_registry};
use crate::row_condition::row_filter_from_kwargs;
use crate::{ExpectationsError, Result};

/// Provider function run by the SQL engine.
pub type SqlMetricFn =
    Arc<dyn Fn(&MetricCall<'_, SqlExecutionEngine>) -> Result<SqlMetricOutcome> + Send + Sync>;

/// Turns fetched rows into a metric value.
pub type SqlDecodeFn = Box<dyn FnOnce(Vec<SqlRecord>) -> Result<MetricValue> + Send>;

/// What a SQL provider asks the engine to do.
pub enum SqlMetricOutcome {
    /// Value computed without touching the database
    Value(MetricValue),
    /// Aggregate expression, bundled with others on the same compute domain
    Aggregate {
        /// SQL aggregate expression
        expression: String,
        /// Compute domain kwargs the expression runs against
        domain_kwargs: Kwargs,
    },
    /// Query run on its own, with its rows decoded into the value
    Query {
        /// Statement text
        sql: String,
        /// Row decoder
        decode: SqlDecodeFn,
    },
}

impl SqlMetricOutcome {
    /// Builds a query outcome.
    pub fn query<F>(sql: impl Into<String>, decode: F) -> Self
    where
        F: FnOnce(Vec<SqlRecord>) -> Result<MetricValue> + Send + 'static,
    {
        Self::Query {
            sql: sql.into(),
            decode: Box::new(decode),
        }
    }
}

impl std::fmt::Debug for SqlMetricOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Aggregate {
                expression,
                domain_kwargs,
            } => f
                .debug_struct("Aggregate")
                .field("expression", expression)
                .field("domain_kwargs", domain_kwargs)
                .finish(),
            Self::Query { sql, .. } => f.debug_struct("Query").field("sql", sql).finish(),
        }
    }
}

/// Name and declared type of a batch column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlColumn {
    /// Column name
    pub name: String,
    /// Declared type as reported by SQLite
    pub type_name: String,
    /// Storage classes (`integer`, `real`, `text`, `blob`) of the non-null
    /// values, inspected at load time for columns without a numeric or text
    /// affinity; empty otherwise
    pub storage_classes: Vec<String>,
}

impl SqlColumn {
    /// Returns true if the declared type gives the column a numeric or text
    /// affinity.
    pub fn has_typed_affinity(&self) -> bool {
        let upper = self.type_name.to_ascii_uppercase();
        ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC", "CHAR", "CLOB", "TEXT"]
            .iter()
            .any(|t| upper.contains(t))
    }
}

#[derive(Debug)]
struct LoadedSqlBatch {
    selectable: SqlSelectable,
    columns: Vec<SqlColumn>,
    markers: BatchMarkers,
    temp_table: Option<String>,
}

/// Execution engine over a SQLite database.
#[derive(Debug)]
pub struct SqlExecutionEngine {
    pool: SqlitePool,
    config: SqlEngineConfig,
    registry: Arc<MetricRegistry>,
    batches: HashMap<String, LoadedSqlBatch>,
    active_batch_id: Option<String>,
    round_trips: AtomicUsize,
    database_url: String,
}

impl SqlExecutionEngine {
    /// Connects with the default engine configuration.
    ///
    /// # Errors
    /// Returns error if the connection string is invalid or the database
    /// cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, SqlEngineConfig::default()).await
    }

    /// Connects with a custom engine configuration.
    pub async fn connect_with(database_url: &str, config: SqlEngineConfig) -> Result<Self> {
        config.validate()?;
        let normalized = normalize_connection_string(database_url);
        let redacted = redact_database_url(&normalized);

        let mut config = config;
        if is_in_memory(&normalized) && config.max_connections > 1 {
            tracing::warn!(
                max_connections = config.max_connections,
                "In-memory SQLite databases are per connection; using a single connection"
            );
            config.max_connections = 1;
        }

        let options = SqliteConnectOptions::from_str(&normalized)
            .map_err(|e| {
                ExpectationsError::configuration(format!(
                    "Invalid SQLite connection string {}: {}",
                    redacted, e
                ))
            })?
            .read_only(config.read_only)
            .create_if_missing(!config.read_only);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                ExpectationsError::query_failed(format!("Failed to open SQLite database {}", redacted), e)
            })?;

        tracing::debug!(database = %redacted, "Connected SQL execution engine");
        Ok(Self::from_pool_with(pool, config, redacted))
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool, config: SqlEngineConfig) -> Self {
        Self::from_pool_with(pool, config, "<pool>".to_string())
    }

    fn from_pool_with(pool: SqlitePool, config: SqlEngineConfig, database_url: String) -> Self {
        Self {
            pool,
            config,
            registry: global_registry(),
            batches: HashMap::new(),
            active_batch_id: None,
            round_trips: AtomicUsize::new(0),
            database_url,
        }
    }

    /// Builder method to use a different registry.
    pub fn with_registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Engine configuration.
    pub fn config(&self) -> &SqlEngineConfig {
        &self.config
    }

    /// Redacted connection string.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Closes the pool; temporary tables are dropped with their connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs a statement that returns no rows.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        tracing::trace!(sql = %sql, "Executing statement");
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(self.config.statement_timeout, sqlx::query(sql).execute(&self.pool))
            .await
            .map_err(|e| ExpectationsError::query_failed(format!("Statement timed out: {}", sql), e))?
            .map_err(|e| ExpectationsError::query_failed(format!("Statement failed: {}", sql), e))?;
        Ok(result.rows_affected())
    }

    /// Runs a query and returns its rows.
    pub async fn fetch_records(&self, sql: &str) -> Result<Vec<SqlRecord>> {
        tracing::trace!(sql = %sql, "Running query");
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let rows = tokio::time::timeout(self.config.statement_timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|e| ExpectationsError::query_failed(format!("Query timed out: {}", sql), e))?
            .map_err(|e| ExpectationsError::query_failed(format!("Query failed: {}", sql), e))?;
        Ok(rows.iter().map(selectable::record_from_row).collect())
    }

    async fn describe_columns(&self, sql: &str) -> Result<Vec<SqlColumn>> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let described = tokio::time::timeout(self.config.statement_timeout, (&self.pool).describe(sql))
            .await
            .map_err(|e| ExpectationsError::query_failed(format!("Describe timed out: {}", sql), e))?
            .map_err(|e| ExpectationsError::query_failed(format!("Failed to describe {}", sql), e))?;
        Ok(described
            .columns()
            .iter()
            .map(|c| SqlColumn {
                name: c.name().to_string(),
                type_name: c.type_info().name().to_string(),
                storage_classes: Vec::new(),
            })
            .collect())
    }

    /// Records the storage classes held by columns without a typed affinity,
    /// in one query over the batch.
    async fn collect_storage_classes(
        &self,
        selectable: &SqlSelectable,
        columns: &mut [SqlColumn],
    ) -> Result<()> {
        let untyped: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.has_typed_affinity())
            .map(|(i, _)| i)
            .collect();
        if untyped.is_empty() {
            return Ok(());
        }

        let selections = untyped
            .iter()
            .enumerate()
            .filter_map(|(n, &i)| {
                columns.get(i).map(|c| {
                    format!(
                        "group_concat(DISTINCT NULLIF(typeof({}), 'null')) AS {}",
                        quote_identifier(&c.name),
                        quote_identifier(&format!("classes_{}", n))
                    )
                })
            })
            .collect::<Vec<_>>()
            .join(", ");
        let records = self.fetch_records(&selectable.select(&selections)).await?;
        let Some(record) = records.first() else {
            return Ok(());
        };
        for (n, &i) in untyped.iter().enumerate() {
            if let (Some(Value::String(classes)), Some(column)) =
                (record.get(&format!("classes_{}", n)), columns.get_mut(i))
            {
                column.storage_classes = classes.split(',').map(str::to_string).collect();
                column.storage_classes.sort();
            }
        }
        Ok(())
    }

    /// Restricts the batch named by the domain kwargs to a compute domain.
    pub fn get_compute_domain(
        &self,
        domain_kwargs: &Kwargs,
        domain_type: MetricDomainType,
    ) -> Result<ComputeDomain<SqlSelectable>> {
        let domain = Domain::from_kwargs(domain_kwargs, domain_type)?;
        let split = domain.split();
        let batch = self.resolve_batch(&split.compute)?;

        let projection = domain.projection();
        for column in domain.accessor_columns().iter().chain(projection.iter()) {
            if !batch.columns.iter().any(|c| c.name == *column) {
                return Err(ExpectationsError::metric_resolution(format!(
                    "column '{}' not found in batch; available columns: [{}]",
                    column,
                    batch
                        .columns
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        let mut selectable = batch.selectable.clone();
        if let Some(condition) = row_filter_from_kwargs(&split.compute, EngineType::Sql)? {
            selectable = selectable.and_where(condition_to_sql(&condition));
        }

        match &domain {
            Domain::ColumnPair(pair) => {
                let (a, b) = (
                    format!("{} IS NULL", quote_identifier(&pair.column_a)),
                    format!("{} IS NULL", quote_identifier(&pair.column_b)),
                );
                match PairIgnoreRowIf::from_kwargs(&split.compute)? {
                    PairIgnoreRowIf::BothValuesAreMissing => {
                        selectable = selectable.and_where(format!("NOT ({} AND {})", a, b));
                    }
                    PairIgnoreRowIf::EitherValueIsMissing => {
                        selectable = selectable.and_where(format!("NOT ({} OR {})", a, b));
                    }
                    PairIgnoreRowIf::Neither => {}
                }
            }
            Domain::Multicolumn(multi) => {
                let nulls: Vec<String> = multi
                    .columns
                    .iter()
                    .map(|c| format!("{} IS NULL", quote_identifier(c)))
                    .collect();
                match MulticolumnIgnoreRowIf::from_kwargs(&split.compute)? {
                    MulticolumnIgnoreRowIf::AllValuesAreMissing => {
                        selectable =
                            selectable.and_where(format!("NOT ({})", nulls.join(" AND ")));
                    }
                    MulticolumnIgnoreRowIf::AnyValueIsMissing => {
                        selectable = selectable.and_where(format!("NOT ({})", nulls.join(" OR ")));
                    }
                    MulticolumnIgnoreRowIf::Never => {}
                }
            }
            Domain::Identity(_) if !projection.is_empty() => {
                let columns = projection
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                selectable = SqlSelectable::new(format!(
                    "({}) AS {}",
                    selectable.select(&columns),
                    quote_identifier("ge_projection")
                ));
            }
            _ => {}
        }

        Ok(ComputeDomain {
            handle: selectable,
            compute_kwargs: split.compute,
            accessor_kwargs: split.accessor,
        })
    }

    /// Columns of the batch selected by compute kwargs.
    pub fn batch_columns(&self, compute_kwargs: &Kwargs) -> Result<&[SqlColumn]> {
        Ok(&self.resolve_batch(compute_kwargs)?.columns)
    }

    /// Temporary table backing a batch, if one was created.
    pub fn temp_table_name(&self, batch_id: &str) -> Option<&str> {
        self.batches.get(batch_id).and_then(|b| b.temp_table.as_deref())
    }

    fn resolve_batch(&self, compute_kwargs: &Kwargs) -> Result<&LoadedSqlBatch> {
        let batch_id = match compute_kwargs.get_str(BATCH_ID_KEY) {
            Some(id) => id,
            None => self.active_batch_id.as_deref().ok_or_else(|| {
                ExpectationsError::metric_resolution("no batch loaded and no batch_id given")
            })?,
        };
        self.batches.get(batch_id).ok_or_else(|| {
            ExpectationsError::metric_resolution(format!("batch '{}' is not loaded", batch_id))
        })
    }

    async fn batch_target(&self, source: &BatchSource) -> Result<(String, Option<String>)> {
        match source {
            BatchSource::SqlTable(spec) => {
                let table = quote_identifier(&spec.table_name);
                let target = match &spec.schema_name {
                    Some(schema) => format!("{}.{}", quote_identifier(schema), table),
                    None => table,
                };
                Ok((target, None))
            }
            BatchSource::RuntimeQuery(spec) => {
                let mut create = spec
                    .create_temp_table
                    .unwrap_or(self.config.create_temp_table);
                if create && self.config.read_only {
                    tracing::warn!("Read-only engine; using the query as a subquery instead of a temporary table");
                    create = false;
                }
                if !create {
                    return Ok((
                        format!("({}) AS {}", spec.query, quote_identifier("ge_subquery")),
                        None,
                    ));
                }
                let name = spec
                    .temp_table_name
                    .clone()
                    .unwrap_or_else(generate_temp_table_name);
                self.execute(&format!(
                    "CREATE TEMPORARY TABLE {} AS {}",
                    quote_identifier(&name),
                    spec.query
                ))
                .await?;
                tracing::debug!(temp_table = %name, "Materialized query batch");
                Ok((quote_identifier(&name), Some(name)))
            }
            other => Err(ExpectationsError::invalid_batch_spec(format!(
                "SQL engine cannot load {} batches",
                other.kind()
            ))),
        }
    }
}

/// Applies partitioning and sampling as a subquery over the batch target.
fn restricted_selectable(
    target: String,
    partition: Option<&Partition>,
    sampling: Option<&Sampling>,
) -> SqlSelectable {
    let mut conditions = Vec::new();
    let mut limit = None;

    if let Some(Partition::ColumnValue { column, value }) = partition {
        conditions.push(match value {
            Value::Null => format!("{} IS NULL", quote_identifier(column)),
            other => format!("{} = {}", quote_identifier(column), sql_literal(other)),
        });
    }
    match sampling {
        Some(Sampling::Limit { n }) => limit = Some(*n),
        Some(Sampling::Mod {
            column,
            modulo,
            value,
        }) => conditions.push(format!(
            "{} % {} = {}",
            quote_identifier(column),
            modulo,
            value
        )),
        None => {}
    }

    if conditions.is_empty() && limit.is_none() {
        return SqlSelectable::new(target);
    }

    let mut query = format!("SELECT * FROM {}", target);
    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }
    if let Some(n) = limit {
        query.push_str(&format!(" LIMIT {}", n));
    }
    SqlSelectable::new(format!("({}) AS {}", query, quote_identifier("ge_batch")))
}

/// `ge_temp_` plus eight hex characters.
fn generate_temp_table_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("ge_temp_{}", &id[..8])
}

fn is_in_memory(connection_string: &str) -> bool {
    connection_string.contains(":memory:") || connection_string.contains("mode=memory")
}

/// Normalizes a connection string to SQLite URL form.
fn normalize_connection_string(connection_string: &str) -> String {
    if connection_string == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    if connection_string.starts_with("sqlite:") {
        return connection_string.to_string();
    }
    format!("sqlite://{}", connection_string)
}

#[async_trait]
impl ExecutionEngine for SqlExecutionEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Sql
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

        let (target, temp_table) = self.batch_target(&batch_spec.source).await?;
        let selectable = restricted_selectable(
            target,
            batch_spec.partition.as_ref(),
            batch_spec.sampling.as_ref(),
        );
        let mut columns = self.describe_columns(&selectable.select("*")).await?;
        self.collect_storage_classes(&selectable, &mut columns).await?;
        let markers = BatchMarkers::new();

        tracing::debug!(
            batch_id = %batch_id,
            source = batch_spec.source.kind(),
            columns = columns.len(),
            "Loaded SQL batch"
        );
        self.batches.insert(
            batch_id.clone(),
            LoadedSqlBatch {
                selectable,
                columns,
                markers: markers.clone(),
                temp_table,
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
impl MetricBackend for SqlExecutionEngine {
    type Partial = String;

    fn backend_type(&self) -> EngineType {
        EngineType::Sql
    }

    fn metric_registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    async fn compute(
        &self,
        registration: &MetricRegistration,
        configuration: &MetricConfiguration,
        resolved: &MetricValues,
    ) -> Result<Computed<String>> {
        let provider = match &registration.provider {
            MetricFn::Sql(provider) => provider,
            #[allow(unreachable_patterns)]
            _ => return Err(wrong_engine(registration, EngineType::Sql)),
        };
        let outcome = provider(&MetricCall {
            engine: self,
            configuration,
            metrics: resolved,
        })?;

        match outcome {
            SqlMetricOutcome::Value(value) => Ok(Computed::Ready(value)),
            SqlMetricOutcome::Aggregate {
                expression,
                domain_kwargs,
            } => Ok(Computed::Bundled {
                domain_kwargs,
                partial: expression,
            }),
            SqlMetricOutcome::Query { sql, decode } => {
                let records = self.fetch_records(&sql).await?;
                Ok(Computed::Ready(decode(records)?))
            }
        }
    }

    async fn flush_bundle(&self, domain_kwargs: &Kwargs, partials: Vec<String>) -> Result<Vec<Value>> {
        let domain = self.get_compute_domain(domain_kwargs, MetricDomainType::Table)?;
        let columns = partials
            .iter()
            .enumerate()
            .map(|(i, expression)| format!("{} AS {}", expression, quote_identifier(&format!("m{}", i))))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = domain.handle.select(&columns);
        let mut records = self.fetch_records(&sql).await?;
        if records.len() != 1 {
            return Err(ExpectationsError::metric_resolution(format!(
                "aggregate query returned {} rows: {}",
                records.len(),
                sql
            )));
        }
        Ok(records.remove(0).values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_table_name_shape() {
        let name = generate_temp_table_name();
        assert!(name.starts_with("ge_temp_"));
        assert_eq!(name.len(), "ge_temp_".len() + 8);
        assert!(name["ge_temp_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalize_connection_string() {
        assert_eq!(normalize_connection_string(":memory:"), "sqlite::memory:");
        assert_eq!(normalize_connection_string("/tmp/x.db"), "sqlite:///tmp/x.db");
        assert!(is_in_memory("sqlite::memory:"));
    }

    #[test]
    fn test_restricted_selectable() {
        let plain = restricted_selectable("\"t\"".into(), None, None);
        assert_eq!(plain.from, "\"t\"");

        let sampled = restricted_selectable(
            "\"t\"".into(),
            Some(&Partition::ColumnValue {
                column: "g".into(),
                value: serde_json::json!("a"),
            }),
            Some(&Sampling::Limit { n: 10 }),
        );
        assert_eq!(
            sampled.from,
            "(SELECT * FROM \"t\" WHERE \"g\" = 'a' LIMIT 10) AS \"ge_batch\""
        );
    }

    async fn engine() -> SqlExecutionEngine {
        let engine = SqlExecutionEngine::connect("sqlite::memory:").await.unwrap();
        engine
            .execute("CREATE TABLE t (a INTEGER, b TEXT)")
            .await
            .unwrap();
        engine
            .execute("INSERT INTO t VALUES (1, 'x'), (2, NULL), (NULL, 'z')")
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_load_table_and_compute_domain() {
        let mut engine = engine().await;
        engine.load_batch(BatchSpec::sql_table("t")).await.unwrap();

        let domain = engine
            .get_compute_domain(
                &Kwargs::new()
                    .with("column", "a")
                    .with("row_condition", "col(\"b\").notnull()"),
                MetricDomainType::Column,
            )
            .unwrap();
        assert_eq!(domain.handle.from_clause(), "FROM \"t\" WHERE \"b\" IS NOT NULL");

        let records = engine
            .fetch_records(&domain.handle.select("COUNT(*) AS n"))
            .await
            .unwrap();
        assert_eq!(records[0].get("n"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_missing_table_fails_at_load() {
        let mut engine = engine().await;
        let err = engine.load_batch(BatchSpec::sql_table("nope")).await.unwrap_err();
        assert!(matches!(err, ExpectationsError::Query { .. }));
    }

    #[tokio::test]
    async fn test_query_batch_temp_table() {
        let mut engine = engine().await;
        let batch = engine
            .load_batch(BatchSpec::query("SELECT a FROM t WHERE a IS NOT NULL"))
            .await
            .unwrap();
        let temp = engine.temp_table_name(&batch.id).unwrap().to_string();
        assert!(temp.starts_with("ge_temp_"));

        let records = engine
            .fetch_records(&format!("SELECT COUNT(*) AS n FROM {}", quote_identifier(&temp)))
            .await
            .unwrap();
        assert_eq!(records[0].get("n"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_query_batch_as_subquery() {
        let mut engine = engine().await;
        let batch = engine
            .load_batch(BatchSpec::query("SELECT a FROM t").with_temp_table(false, None))
            .await
            .unwrap();
        assert!(engine.temp_table_name(&batch.id).is_none());
        assert_eq!(engine.batch_columns(&Kwargs::new()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_untyped_columns_record_storage_classes() {
        let mut engine = engine().await;
        engine.execute("CREATE TABLE u (v, w INTEGER)").await.unwrap();
        engine
            .execute("INSERT INTO u VALUES (1, 1), ('x', 2), (NULL, 3), (2.5, 4)")
            .await
            .unwrap();
        engine.load_batch(BatchSpec::sql_table("u")).await.unwrap();

        let columns = engine.batch_columns(&Kwargs::new()).unwrap();
        assert_eq!(columns[0].storage_classes, vec!["integer", "real", "text"]);
        assert!(columns[1].has_typed_affinity());
        assert!(columns[1].storage_classes.is_empty());
    }

    #[tokio::test]
    async fn test_pandas_parser_rejected() {
        let mut engine = engine().await;
        engine.load_batch(BatchSpec::sql_table("t")).await.unwrap();
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
}
