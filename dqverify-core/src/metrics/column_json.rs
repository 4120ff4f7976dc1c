//! Column map metrics over JSON documents.
//!
//! Text values are parsed as JSON before they are judged. On the table
//! engine, values that are already structured JSON are judged as they are.
//! SQLite has no JSON schema support, so neither metric has a SQL condition.

use serde::de::IgnoredAny;
use serde_json::Value;

use crate::domain::MetricDomainType;
use crate::kwargs::Kwargs;
use crate::provider::map::MapMetricProvider;
use crate::{ExpectationsError, Result};

#[cfg(feature = "polars")]
use crate::provider::map::FrameConditionInput;
#[cfg(feature = "polars")]
use polars::prelude::{BooleanChunked, DataType, Expr, GetOutput, IntoSeries, col, lit};
#[cfg(feature = "polars")]
use std::sync::Arc;

/// Value key holding the schema of `column_values.match_json_schema`.
pub const JSON_SCHEMA_KEY: &str = "json_schema";

/// Rows whose text value parses as JSON.
pub static JSON_PARSEABLE: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.json_parseable",
    metric_class: "ColumnValuesJsonParseable",
    domain_type: MetricDomainType::Column,
    value_keys: &[],
    filter_column_isnull: true,
    window: false,
    table: Some(json_parseable_table),
    #[cfg(feature = "sqlite")]
    sql: None,
    #[cfg(feature = "polars")]
    frame: Some(json_parseable_frame),
};

/// Rows whose JSON document validates against `json_schema`.
pub static MATCH_JSON_SCHEMA: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.match_json_schema",
    metric_class: "ColumnValuesMatchJsonSchema",
    domain_type: MetricDomainType::Column,
    value_keys: &[JSON_SCHEMA_KEY],
    filter_column_isnull: true,
    window: false,
    table: Some(match_json_schema_table),
    #[cfg(feature = "sqlite")]
    sql: None,
    #[cfg(feature = "polars")]
    frame: Some(match_json_schema_frame),
};

fn is_json_text(text: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(text).is_ok()
}

/// Compiles the `json_schema` value kwarg.
pub fn compile_schema(kwargs: &Kwargs) -> Result<jsonschema::Validator> {
    let schema = kwargs
        .get(JSON_SCHEMA_KEY)
        .ok_or_else(|| ExpectationsError::configuration("json_schema is required"))?;
    jsonschema::validator_for(schema)
        .map_err(|e| ExpectationsError::configuration(format!("invalid json_schema: {}", e)))
}

fn matches_schema(validator: &jsonschema::Validator, text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok_and(|document| validator.is_valid(&document))
}

fn first<'a>(row: &[&'a Value]) -> &'a Value {
    row.first().copied().unwrap_or(&Value::Null)
}

fn json_parseable_table(rows: &[Vec<&Value>], _: &Kwargs) -> Result<Vec<bool>> {
    Ok(rows
        .iter()
        .map(|row| matches!(first(row), Value::String(text) if is_json_text(text)))
        .collect())
}

fn match_json_schema_table(rows: &[Vec<&Value>], kwargs: &Kwargs) -> Result<Vec<bool>> {
    let validator = compile_schema(kwargs)?;
    Ok(rows
        .iter()
        .map(|row| match first(row) {
            Value::String(text) => matches_schema(&validator, text),
            document => validator.is_valid(document),
        })
        .collect())
}

#[cfg(feature = "polars")]
fn frame_column(input: &FrameConditionInput<'_>) -> Result<Expr> {
    input
        .columns
        .first()
        .map(|c| col(c))
        .ok_or_else(|| ExpectationsError::configuration("column map condition requires a column"))
}

/// Applies `judge` to every text value of a string expression.
#[cfg(feature = "polars")]
fn judge_text<F>(text: Expr, judge: F) -> Expr
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    text.map(
        move |series| {
            let flags: BooleanChunked = series
                .str()?
                .into_iter()
                .map(|value| value.map(&judge))
                .collect();
            Ok(Some(flags.with_name(series.name()).into_series()))
        },
        GetOutput::from_type(DataType::Boolean),
    )
}

/// Only string columns hold JSON text.
#[cfg(feature = "polars")]
fn json_parseable_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    if input.dtypes.first() != Some(&DataType::String) {
        return Ok(lit(false));
    }
    Ok(judge_text(frame_column(input)?, is_json_text))
}

/// Non-string columns are rendered as text first, so a number is judged as
/// the JSON number it spells.
#[cfg(feature = "polars")]
fn match_json_schema_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let validator = Arc::new(compile_schema(input.value_kwargs)?);
    Ok(judge_text(
        frame_column(input)?.cast(DataType::String),
        move |text| matches_schema(&validator, text),
    ))
}
