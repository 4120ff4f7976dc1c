//! Batch descriptions, load options and markers.
//!
//! A [`BatchSpec`] describes where a batch comes from; engines turn it into a
//! backend handle and keep it under a batch id. [`BatchMarkers`] travel with
//! every loaded batch and always include `ge_load_time`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{ExpectationsError, Result};

/// Marker key holding the load timestamp.
pub const LOAD_TIME_MARKER: &str = "ge_load_time";

/// Timestamp format used for `ge_load_time`.
pub const LOAD_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// In-memory payload for runtime batches.
#[derive(Debug, Clone)]
pub enum BatchData {
    /// Records as a JSON array of objects
    Records(Value),
    /// A dataframe
    #[cfg(feature = "polars")]
    Frame(polars::prelude::DataFrame),
}

/// File formats readable by path batch specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathFormat {
    /// Picked from the file extension
    #[default]
    Infer,
    /// One JSON object per line
    JsonLines,
    /// A JSON array of objects
    Json,
    /// Comma-separated with a header row
    Csv,
}

impl PathFormat {
    /// Resolves `Infer` from the path extension.
    pub fn resolve(self, path: &std::path::Path) -> Self {
        if self != Self::Infer {
            return self;
        }
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jsonl" | "ndjson") => Self::JsonLines,
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Infer,
        }
    }
}

/// Runtime batch carrying its own data.
#[derive(Debug, Clone, Default)]
pub struct RuntimeDataBatchSpec {
    /// Payload; `None` is rejected at load time
    pub batch_data: Option<BatchData>,
}

/// Batch read from a file.
#[derive(Debug, Clone)]
pub struct PathBatchSpec {
    /// File location
    pub path: PathBuf,
    /// File format
    pub format: PathFormat,
}

/// Batch backed by a SQL table.
#[derive(Debug, Clone, Default)]
pub struct SqlTableBatchSpec {
    /// Table name; empty is rejected at load time
    pub table_name: String,
    /// Optional schema (attached database in SQLite)
    pub schema_name: Option<String>,
}

/// Batch backed by an ad-hoc SQL query.
#[derive(Debug, Clone, Default)]
pub struct RuntimeQueryBatchSpec {
    /// Query text; empty is rejected at load time
    pub query: String,
    /// Materialize into a temporary table; `None` uses the engine default
    pub create_temp_table: Option<bool>,
    /// Name for the temporary table; generated when absent
    pub temp_table_name: Option<String>,
}

/// Where a batch comes from.
#[derive(Debug, Clone)]
pub enum BatchSource {
    /// In-memory payload
    RuntimeData(RuntimeDataBatchSpec),
    /// File path
    Path(PathBatchSpec),
    /// SQL table
    SqlTable(SqlTableBatchSpec),
    /// SQL query
    RuntimeQuery(RuntimeQueryBatchSpec),
}

impl BatchSource {
    /// Short name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RuntimeData(_) => "runtime_data",
            Self::Path(_) => "path",
            Self::SqlTable(_) => "sql_table",
            Self::RuntimeQuery(_) => "runtime_query",
        }
    }
}

/// Row sampling applied while loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Sampling {
    /// Keep the first `n` rows
    Limit {
        /// Row count
        n: usize,
    },
    /// Keep rows where `column % modulo == value`
    Mod {
        /// Integer column
        column: String,
        /// Divisor
        modulo: i64,
        /// Remainder to keep
        value: i64,
    },
}

/// Partitioning applied while loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Partition {
    /// Keep rows where `column == value`
    ColumnValue {
        /// Partition column
        column: String,
        /// Partition value
        value: Value,
    },
}

/// A batch description plus load options.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    /// Data source
    pub source: BatchSource,
    /// Caller-supplied id; a uuid is generated when absent
    pub batch_id: Option<String>,
    /// Sampling option
    pub sampling: Option<Sampling>,
    /// Partitioning option
    pub partition: Option<Partition>,
}

impl BatchSpec {
    /// Creates a spec for a source with no load options.
    pub fn new(source: BatchSource) -> Self {
        Self {
            source,
            batch_id: None,
            sampling: None,
            partition: None,
        }
    }

    /// Runtime batch from a payload.
    pub fn runtime_data(batch_data: BatchData) -> Self {
        Self::new(BatchSource::RuntimeData(RuntimeDataBatchSpec {
            batch_data: Some(batch_data),
        }))
    }

    /// Runtime batch from JSON records.
    pub fn records(records: Value) -> Self {
        Self::runtime_data(BatchData::Records(records))
    }

    /// Runtime batch from a dataframe.
    #[cfg(feature = "polars")]
    pub fn dataframe(frame: polars::prelude::DataFrame) -> Self {
        Self::runtime_data(BatchData::Frame(frame))
    }

    /// File batch with the format inferred from the extension.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::new(BatchSource::Path(PathBatchSpec {
            path: path.into(),
            format: PathFormat::Infer,
        }))
    }

    /// SQL table batch.
    pub fn sql_table(table_name: impl Into<String>) -> Self {
        Self::new(BatchSource::SqlTable(SqlTableBatchSpec {
            table_name: table_name.into(),
            schema_name: None,
        }))
    }

    /// SQL query batch.
    pub fn query(query: impl Into<String>) -> Self {
        Self::new(BatchSource::RuntimeQuery(RuntimeQueryBatchSpec {
            query: query.into(),
            create_temp_table: None,
            temp_table_name: None,
        }))
    }

    /// Builder method to set the batch id.
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Builder method to set sampling.
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Builder method to set partitioning.
    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Builder method to set the schema of a SQL table batch.
    pub fn with_schema(mut self, schema_name: impl Into<String>) -> Self {
        if let BatchSource::SqlTable(spec) = &mut self.source {
            spec.schema_name = Some(schema_name.into());
        }
        self
    }

    /// Builder method to set the file format of a path batch.
    pub fn with_format(mut self, format: PathFormat) -> Self {
        if let BatchSource::Path(spec) = &mut self.source {
            spec.format = format;
        }
        self
    }

    /// Builder method to control temp-table materialization of a query batch.
    pub fn with_temp_table(mut self, create: bool, name: Option<String>) -> Self {
        if let BatchSource::RuntimeQuery(spec) = &mut self.source {
            spec.create_temp_table = Some(create);
            spec.temp_table_name = name;
        }
        self
    }

    /// Checks required fields. Engines call this before touching the backend.
    pub fn validate(&self) -> Result<()> {
        let missing = match &self.source {
            BatchSource::RuntimeData(spec) => match &spec.batch_data {
                None | Some(BatchData::Records(Value::Null)) => {
                    Some("runtime batch requires batch_data")
                }
                _ => None,
            },
            BatchSource::Path(spec) if spec.path.as_os_str().is_empty() => {
                Some("path batch requires a path")
            }
            BatchSource::SqlTable(spec) if spec.table_name.trim().is_empty() => {
                Some("table batch requires table_name")
            }
            BatchSource::RuntimeQuery(spec) if spec.query.trim().is_empty() => {
                Some("query batch requires a query")
            }
            _ => None,
        };
        if let Some(message) = missing {
            return Err(ExpectationsError::invalid_batch_spec(message));
        }

        if let Some(Sampling::Mod { modulo, .. }) = &self.sampling
            && *modulo == 0
        {
            return Err(ExpectationsError::invalid_batch_spec(
                "mod sampling requires a non-zero modulo",
            ));
        }
        Ok(())
    }

    /// Returns the caller's batch id or a fresh uuid.
    pub fn resolve_batch_id(&self) -> Result<String> {
        match &self.batch_id {
            Some(id) if id.trim().is_empty() => {
                Err(ExpectationsError::invalid_batch_id("batch_id must not be empty"))
            }
            Some(id) => Ok(id.clone()),
            None => Ok(uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Metadata recorded when a batch is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct BatchMarkers(BTreeMap<String, Value>);

impl BatchMarkers {
    /// Creates markers stamped with the current time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates markers stamped with the given time.
    pub fn at(load_time: DateTime<Utc>) -> Self {
        let mut markers = BTreeMap::new();
        markers.insert(
            LOAD_TIME_MARKER.to_string(),
            Value::String(load_time.format(LOAD_TIME_FORMAT).to_string()),
        );
        Self(markers)
    }

    /// Builds markers from a map; `ge_load_time` is required.
    pub fn from_map(markers: BTreeMap<String, Value>) -> Result<Self> {
        match markers.get(LOAD_TIME_MARKER) {
            Some(Value::String(_)) => Ok(Self(markers)),
            Some(other) => Err(ExpectationsError::invalid_batch_id(format!(
                "{} must be a string, got {}",
                LOAD_TIME_MARKER, other
            ))),
            None => Err(ExpectationsError::invalid_batch_id(format!(
                "batch markers must include {}",
                LOAD_TIME_MARKER
            ))),
        }
    }

    /// Builder method to add a marker.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Formatted load time.
    pub fn load_time(&self) -> Option<&str> {
        self.0.get(LOAD_TIME_MARKER).and_then(Value::as_str)
    }

    /// Returns a marker.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl Default for BatchMarkers {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<BTreeMap<String, Value>> for BatchMarkers {
    type Error = ExpectationsError;

    fn try_from(markers: BTreeMap<String, Value>) -> Result<Self> {
        Self::from_map(markers)
    }
}

impl From<BatchMarkers> for BTreeMap<String, Value> {
    fn from(markers: BatchMarkers) -> Self {
        markers.0
    }
}

/// A loaded batch as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch id
    pub id: String,
    /// Load markers
    pub markers: BatchMarkers,
    /// Source kind (`runtime_data`, `path`, `sql_table`, `runtime_query`)
    pub source: String,
}
