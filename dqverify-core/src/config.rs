//! Result-format, runtime and engine configuration.
//!
//! Every config type follows the same shape: serde-serializable, `Default`,
//! `new()`, `with_*` builder methods that clamp out-of-range input with a
//! warning, and a `validate()` that rejects values a builder would have clamped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::kwargs::Kwargs;
use crate::{ExpectationsError, Result};

/// Default number of unexpected values kept when output is truncated.
pub const DEFAULT_PARTIAL_UNEXPECTED_COUNT: usize = 20;

/// How much diagnostic detail a validation result carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultFormat {
    /// Only `success`
    BooleanOnly,
    /// Counts, percentages and a truncated unexpected list
    #[default]
    Basic,
    /// BASIC plus partial index list and value counts
    Summary,
    /// Everything, without truncation
    Complete,
}

impl ResultFormat {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFormat::BooleanOnly => "BOOLEAN_ONLY",
            ResultFormat::Basic => "BASIC",
            ResultFormat::Summary => "SUMMARY",
            ResultFormat::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultFormat {
    type Err = ConfigValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BOOLEAN_ONLY" => Ok(ResultFormat::BooleanOnly),
            "BASIC" => Ok(ResultFormat::Basic),
            "SUMMARY" => Ok(ResultFormat::Summary),
            "COMPLETE" => Ok(ResultFormat::Complete),
            _ => Err(ConfigValidationError::UnknownResultFormat(s.to_string())),
        }
    }
}

/// Validation errors for configuration values.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("unknown result_format '{0}'")]
    UnknownResultFormat(String),
    #[error("result_format must be a string or a mapping, got {0}")]
    InvalidResultFormatShape(String),
    #[error("partial_unexpected_count must be at least 1, got {0}")]
    InvalidPartialUnexpectedCount(i64),
    #[error("max_connections must be at least 1")]
    InvalidMaxConnections,
    #[error("statement_timeout must be greater than zero")]
    InvalidStatementTimeout,
    #[error("mostly must be between 0.0 and 1.0, got {0}")]
    InvalidMostly(f64),
}

/// Result-format configuration.
///
/// Deserializes from either a bare string (`"COMPLETE"`) or a mapping with
/// a `result_format` key and optional tuning fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultFormatConfig {
    /// Detail level
    pub result_format: ResultFormat,
    /// Maximum length of partial lists (ignored by COMPLETE)
    pub partial_unexpected_count: usize,
    /// Include full unexpected rows in the result
    pub include_unexpected_rows: bool,
    /// Report index entries as mappings of these columns instead of positions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_index_column_names: Option<Vec<String>>,
    /// Include a query that selects the unexpected rows (SQL engine only)
    pub return_unexpected_index_query: bool,
    /// Omit unexpected value lists from the result
    pub exclude_unexpected_values: bool,
}

impl Default for ResultFormatConfig {
    fn default() -> Self {
        Self {
            result_format: ResultFormat::Basic,
            partial_unexpected_count: DEFAULT_PARTIAL_UNEXPECTED_COUNT,
            include_unexpected_rows: false,
            unexpected_index_column_names: None,
            return_unexpected_index_query: false,
            exclude_unexpected_values: false,
        }
    }
}

impl ResultFormatConfig {
    /// Creates a BASIC config with the default partial count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the detail level.
    pub fn with_result_format(mut self, result_format: ResultFormat) -> Self {
        self.result_format = result_format;
        self
    }

    /// Builder method to set the partial list length.
    pub fn with_partial_unexpected_count(mut self, count: usize) -> Self {
        if count == 0 {
            tracing::warn!("partial_unexpected_count 0 clamped to 1");
        }
        self.partial_unexpected_count = count.max(1);
        self
    }

    /// Builder method to include unexpected rows.
    pub fn with_include_unexpected_rows(mut self, include: bool) -> Self {
        self.include_unexpected_rows = include;
        self
    }

    /// Builder method to report index entries by column values.
    pub fn with_unexpected_index_column_names(mut self, names: Vec<String>) -> Self {
        self.unexpected_index_column_names = Some(names);
        self
    }

    /// Builder method to request an unexpected-index query.
    pub fn with_return_unexpected_index_query(mut self, value: bool) -> Self {
        self.return_unexpected_index_query = value;
        self
    }

    /// Builder method to drop unexpected value lists from output.
    pub fn with_exclude_unexpected_values(mut self, exclude: bool) -> Self {
        self.exclude_unexpected_values = exclude;
        self
    }

    /// Parses the `result_format` value as it appears in expectation kwargs or
    /// metric value kwargs.
    ///
    /// `null` yields the default; a string selects the level; a mapping may
    /// set any field.
    pub fn from_value(value: &Value) -> std::result::Result<Self, ConfigValidationError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(name) => Ok(Self::default().with_result_format(name.parse()?)),
            Value::Object(map) => {
                let mut config = Self::default();
                if let Some(level) = map.get("result_format").and_then(Value::as_str) {
                    config.result_format = level.parse()?;
                }
                if let Some(count) = map.get("partial_unexpected_count").and_then(Value::as_i64)
                {
                    if count < 1 {
                        return Err(ConfigValidationError::InvalidPartialUnexpectedCount(count));
                    }
                    config.partial_unexpected_count =
                        usize::try_from(count).unwrap_or(usize::MAX);
                }
                if let Some(flag) = map.get("include_unexpected_rows").and_then(Value::as_bool) {
                    config.include_unexpected_rows = flag;
                }
                if let Some(names) = map
                    .get("unexpected_index_column_names")
                    .and_then(Value::as_array)
                {
                    config.unexpected_index_column_names = Some(
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect(),
                    );
                }
                if let Some(flag) = map
                    .get("return_unexpected_index_query")
                    .and_then(Value::as_bool)
                {
                    config.return_unexpected_index_query = flag;
                }
                if let Some(flag) = map.get("exclude_unexpected_values").and_then(Value::as_bool)
                {
                    config.exclude_unexpected_values = flag;
                }
                Ok(config)
            }
            other => Err(ConfigValidationError::InvalidResultFormatShape(
                other.to_string(),
            )),
        }
    }

    /// Reads `result_format` out of metric value kwargs.
    pub fn from_value_kwargs(kwargs: &Kwargs) -> Result<Self> {
        kwargs
            .get("result_format")
            .map_or_else(|| Ok(Self::default()), Self::from_value)
            .map_err(ExpectationsError::from)
    }

    /// Serializes to the mapping form stored in metric value kwargs.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Number of entries kept in truncated lists, or `None` for COMPLETE.
    pub fn limit(&self) -> Option<usize> {
        match self.result_format {
            ResultFormat::Complete => None,
            _ => Some(self.partial_unexpected_count),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.partial_unexpected_count == 0 {
            return Err(ConfigValidationError::InvalidPartialUnexpectedCount(0));
        }
        Ok(())
    }
}

/// Per-run options passed alongside an expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfiguration {
    /// Result detail level; overrides the expectation's own `result_format`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_format: Option<ResultFormatConfig>,
    /// Convert errors into `exception_info` instead of propagating them
    pub catch_exceptions: bool,
    /// Attach the expectation configuration to each result
    pub include_config: bool,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            result_format: None,
            catch_exceptions: true,
            include_config: true,
        }
    }
}

impl RuntimeConfiguration {
    /// Creates a runtime config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to override the result format.
    pub fn with_result_format(mut self, result_format: ResultFormatConfig) -> Self {
        self.result_format = Some(result_format);
        self
    }

    /// Builder method to enable/disable exception capture.
    pub fn with_catch_exceptions(mut self, catch_exceptions: bool) -> Self {
        self.catch_exceptions = catch_exceptions;
        self
    }

    /// Builder method to include the expectation config in results.
    pub fn with_include_config(mut self, include_config: bool) -> Self {
        self.include_config = include_config;
        self
    }
}

/// SQL execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlEngineConfig {
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Time allowed to acquire a pooled connection
    pub acquire_timeout: Duration,
    /// Upper bound on a single statement; enforced client-side
    pub statement_timeout: Duration,
    /// Materialize query batches as temporary tables
    pub create_temp_table: bool,
    /// Open the database read-only (disables temp-table materialization)
    pub read_only: bool,
}

impl Default for SqlEngineConfig {
    fn default() -> Self {
        Self {
            // In-memory SQLite databases are per-connection.
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(60),
            create_temp_table: true,
            read_only: false,
        }
    }
}

impl SqlEngineConfig {
    /// Creates a new engine config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the connection pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        if max_connections == 0 {
            tracing::warn!("max_connections 0 clamped to 1");
        }
        self.max_connections = max_connections.max(1);
        self
    }

    /// Builder method to set the pool acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Builder method to set the per-statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            tracing::warn!("statement_timeout of zero clamped to 1s");
            self.statement_timeout = Duration::from_secs(1);
        } else {
            self.statement_timeout = timeout;
        }
        self
    }

    /// Builder method to toggle temp-table materialization of query batches.
    pub fn with_create_temp_table(mut self, create_temp_table: bool) -> Self {
        self.create_temp_table = create_temp_table;
        self
    }

    /// Builder method to open the database read-only.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if self.max_connections == 0 {
            return Err(ConfigValidationError::InvalidMaxConnections);
        }
        if self.statement_timeout.is_zero() {
            return Err(ConfigValidationError::InvalidStatementTimeout);
        }
        Ok(())
    }
}

/// Validator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Runtime options used when a call does not supply its own
    pub runtime: RuntimeConfiguration,
    /// Default result format for expectations that do not set one
    pub default_result_format: ResultFormatConfig,
}

impl ValidatorConfig {
    /// Creates a validator config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set default runtime options.
    pub fn with_runtime(mut self, runtime: RuntimeConfiguration) -> Self {
        self.runtime = runtime;
        self
    }

    /// Builder method to set the default result format.
    pub fn with_default_result_format(mut self, result_format: ResultFormatConfig) -> Self {
        self.default_result_format = result_format;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        self.default_result_format.validate()?;
        if let Some(result_format) = &self.runtime.result_format {
            result_format.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_format_defaults() {
        let config = ResultFormatConfig::default();
        assert_eq!(config.result_format, ResultFormat::Basic);
        assert_eq!(config.partial_unexpected_count, 20);
        assert_eq!(config.limit(), Some(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_result_format_from_string() {
        let config = ResultFormatConfig::from_value(&json!("complete")).unwrap();
        assert_eq!(config.result_format, ResultFormat::Complete);
        assert_eq!(config.limit(), None);
    }

    #[test]
    fn test_result_format_from_mapping() {
        let config = ResultFormatConfig::from_value(&json!({
            "result_format": "SUMMARY",
            "partial_unexpected_count": 3,
            "include_unexpected_rows": true,
            "unexpected_index_column_names": ["id"]
        }))
        .unwrap();

        assert_eq!(config.result_format, ResultFormat::Summary);
        assert_eq!(config.limit(), Some(3));
        assert!(config.include_unexpected_rows);
        assert_eq!(
            config.unexpected_index_column_names,
            Some(vec!["id".to_string()])
        );
    }

    #[test]
    fn test_result_format_rejects_unknown_level() {
        let err = ResultFormatConfig::from_value(&json!("VERBOSE")).unwrap_err();
        assert!(matches!(err, ConfigValidationError::UnknownResultFormat(_)));

        let err = ResultFormatConfig::from_value(&json!(42)).unwrap_err();
        assert!(matches!(
            err,
            ConfigValidationError::InvalidResultFormatShape(_)
        ));
    }

    #[test]
    fn test_result_format_round_trips_through_value() {
        let config = ResultFormatConfig::new()
            .with_result_format(ResultFormat::Summary)
            .with_partial_unexpected_count(5);
        let parsed = ResultFormatConfig::from_value(&config.to_value()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_count_clamped() {
        let config = ResultFormatConfig::new().with_partial_unexpected_count(0);
        assert_eq!(config.partial_unexpected_count, 1);
    }

    #[test]
    fn test_sql_engine_config_clamps() {
        let config = SqlEngineConfig::new()
            .with_max_connections(0)
            .with_statement_timeout(Duration::ZERO);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.statement_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sql_engine_config_validate_rejects_direct_edits() {
        let mut config = SqlEngineConfig::default();
        config.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidMaxConnections)
        ));
    }

    #[test]
    fn test_runtime_configuration_defaults() {
        let runtime = RuntimeConfiguration::default();
        assert!(runtime.catch_exceptions);
        assert!(runtime.result_format.is_none());
    }
}
