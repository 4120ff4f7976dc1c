//! Column map metrics.
//!
//! Each provider declares one condition per engine; the unexpected-* family
//! is derived on registration. Apart from the null checks themselves, every
//! provider filters nulls before the condition runs.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::MetricDomainType;
use crate::kwargs::Kwargs;
use crate::metric_value::{MetricValue, compare_json, is_missing};
use crate::provider::accessor_columns;
use crate::provider::map::MapMetricProvider;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};
use crate::{ExpectationsError, Result};

#[cfg(feature = "polars")]
use crate::engine::frame::json_literal;
#[cfg(feature = "sqlite")]
use crate::engine::sql::sql_literal;
#[cfg(feature = "polars")]
use crate::provider::map::FrameConditionInput;
#[cfg(feature = "sqlite")]
use crate::provider::map::SqlConditionInput;
#[cfg(feature = "polars")]
use polars::prelude::{DataType, Expr, col, len, lit};

/// Metric name of the non-null value count.
pub const NONNULL_COUNT_METRIC: &str = "column_values.nonnull.count";

/// Rows whose value is present.
pub static NONNULL: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.nonnull",
    metric_class: "ColumnValuesNonNull",
    domain_type: MetricDomainType::Column,
    value_keys: &[],
    filter_column_isnull: false,
    window: false,
    table: Some(nonnull_table),
    #[cfg(feature = "sqlite")]
    sql: Some(nonnull_sql),
    #[cfg(feature = "polars")]
    frame: Some(nonnull_frame),
};

/// Rows whose value is missing.
pub static NULL: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.null",
    metric_class: "ColumnValuesNull",
    domain_type: MetricDomainType::Column,
    value_keys: &[],
    filter_column_isnull: false,
    window: false,
    table: Some(null_table),
    #[cfg(feature = "sqlite")]
    sql: Some(null_sql),
    #[cfg(feature = "polars")]
    frame: Some(null_frame),
};

/// Rows whose value lies within `[min_value, max_value]`.
pub static BETWEEN: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.between",
    metric_class: "ColumnValuesBetween",
    domain_type: MetricDomainType::Column,
    value_keys: &[
        "min_value",
        "max_value",
        "strict_min",
        "strict_max",
        "allow_cross_type_comparisons",
    ],
    filter_column_isnull: true,
    window: false,
    table: Some(between_table),
    #[cfg(feature = "sqlite")]
    sql: Some(between_sql),
    #[cfg(feature = "polars")]
    frame: Some(between_frame),
};

/// Rows whose value is a member of `value_set`.
pub static IN_SET: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.in_set",
    metric_class: "ColumnValuesInSet",
    domain_type: MetricDomainType::Column,
    value_keys: &["value_set"],
    filter_column_isnull: true,
    window: false,
    table: Some(in_set_table),
    #[cfg(feature = "sqlite")]
    sql: Some(in_set_sql),
    #[cfg(feature = "polars")]
    frame: Some(in_set_frame),
};

/// Rows whose value contains a match of `regex`. SQLite has no REGEXP, so
/// there is no SQL condition.
pub static MATCH_REGEX: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.match_regex",
    metric_class: "ColumnValuesMatchRegex",
    domain_type: MetricDomainType::Column,
    value_keys: &["regex"],
    filter_column_isnull: true,
    window: false,
    table: Some(match_regex_table),
    #[cfg(feature = "sqlite")]
    sql: None,
    #[cfg(feature = "polars")]
    frame: Some(match_regex_frame),
};

/// Rows whose value occurs exactly once in the domain.
pub static UNIQUE: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_values.unique",
    metric_class: "ColumnValuesUnique",
    domain_type: MetricDomainType::Column,
    value_keys: &[],
    filter_column_isnull: true,
    window: true,
    table: Some(unique_table),
    #[cfg(feature = "sqlite")]
    sql: Some(unique_sql),
    #[cfg(feature = "polars")]
    frame: Some(unique_frame),
};

fn first<'a>(row: &[&'a Value]) -> &'a Value {
    row.first().copied().unwrap_or(&Value::Null)
}

#[cfg(feature = "polars")]
fn frame_column(input: &FrameConditionInput<'_>) -> Result<Expr> {
    input
        .columns
        .first()
        .map(|c| col(c))
        .ok_or_else(|| ExpectationsError::configuration("column map condition requires a column"))
}

#[cfg(feature = "polars")]
fn frame_dtype(input: &FrameConditionInput<'_>) -> DataType {
    input.dtypes.first().cloned().unwrap_or(DataType::Null)
}

// ============================================================================
// Null checks
// ============================================================================

fn nonnull_table(rows: &[Vec<&Value>], _: &Kwargs) -> Result<Vec<bool>> {
    Ok(rows.iter().map(|row| !is_missing(first(row))).collect())
}

fn null_table(rows: &[Vec<&Value>], _: &Kwargs) -> Result<Vec<bool>> {
    Ok(rows.iter().map(|row| is_missing(first(row))).collect())
}

#[cfg(feature = "sqlite")]
fn nonnull_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    Ok(format!("{} IS NOT NULL", input.column(0)))
}

#[cfg(feature = "sqlite")]
fn null_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    Ok(format!("{} IS NULL", input.column(0)))
}

/// NaN counts as missing in float columns.
#[cfg(feature = "polars")]
fn missing_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let column = frame_column(input)?;
    Ok(if frame_dtype(input).is_float() {
        column.clone().is_null().or(column.is_nan())
    } else {
        column.is_null()
    })
}

#[cfg(feature = "polars")]
fn nonnull_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    Ok(missing_frame(input)?.not())
}

#[cfg(feature = "polars")]
fn null_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    missing_frame(input)
}

// ============================================================================
// Between
// ============================================================================

/// Comparison family of a column or a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Numeric,
    Text,
    Other,
}

impl ValueKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Number(_) => Self::Numeric,
            Value::String(_) => Self::Text,
            _ => Self::Other,
        }
    }

    /// Kind implied by a declared SQLite column type, using SQLite's type
    /// affinity rules.
    #[cfg(feature = "sqlite")]
    fn of_sql_type(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        if upper.contains("INT") || ["REAL", "FLOA", "DOUB", "NUM", "DEC"].iter().any(|t| upper.contains(t)) {
            Self::Numeric
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            Self::Text
        } else {
            Self::Other
        }
    }

    /// Kind shared by every observed storage class; `None` when the column
    /// mixes kinds.
    #[cfg(feature = "sqlite")]
    fn of_storage_classes(classes: &[String]) -> Option<Self> {
        let mut kinds = classes.iter().map(|class| match class.as_str() {
            "integer" | "real" => Self::Numeric,
            "text" => Self::Text,
            _ => Self::Other,
        });
        let Some(first) = kinds.next() else {
            return Some(Self::Other);
        };
        kinds.all(|kind| kind == first).then_some(first)
    }

    /// SQL test that a value has a storage class of this kind.
    #[cfg(feature = "sqlite")]
    fn storage_class_guard(self, column: &str) -> String {
        match self {
            Self::Numeric => format!("typeof({}) IN ('integer', 'real')", column),
            Self::Text => format!("typeof({}) = 'text'", column),
            Self::Other => "1".to_string(),
        }
    }

    #[cfg(feature = "polars")]
    fn of_dtype(dtype: &DataType) -> Self {
        if dtype.is_numeric() {
            Self::Numeric
        } else if *dtype == DataType::String {
            Self::Text
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundSide {
    Min,
    Max,
}

#[derive(Debug)]
struct Bound {
    value: Value,
    side: BoundSide,
    strict: bool,
}

impl Bound {
    fn accepts(&self, ordering: Ordering) -> bool {
        match (self.side, self.strict) {
            (BoundSide::Min, true) => ordering.is_gt(),
            (BoundSide::Min, false) => ordering.is_ge(),
            (BoundSide::Max, true) => ordering.is_lt(),
            (BoundSide::Max, false) => ordering.is_le(),
        }
    }

    #[cfg(feature = "sqlite")]
    fn operator(&self) -> &'static str {
        match (self.side, self.strict) {
            (BoundSide::Min, true) => ">",
            (BoundSide::Min, false) => ">=",
            (BoundSide::Max, true) => "<",
            (BoundSide::Max, false) => "<=",
        }
    }
}

#[derive(Debug)]
struct Bounds {
    bounds: Vec<Bound>,
    allow_cross_type: bool,
}

impl Bounds {
    fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        let read = |key: &str| -> Result<Option<Value>> {
            match kwargs.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(value @ (Value::Number(_) | Value::String(_))) => Ok(Some(value.clone())),
                Some(other) => Err(ExpectationsError::configuration(format!(
                    "{} must be a number or a string, got {}",
                    key, other
                ))),
            }
        };
        let min = read("min_value")?;
        let max = read("max_value")?;

        match (&min, &max) {
            (None, None) => {
                return Err(ExpectationsError::configuration(
                    "min_value and max_value cannot both be null",
                ));
            }
            (Some(min), Some(max))
                if ValueKind::of(min) == ValueKind::of(max)
                    && compare_json(min, max) == Ordering::Greater =>
            {
                return Err(ExpectationsError::configuration(format!(
                    "min_value {} cannot be greater than max_value {}",
                    min, max
                )));
            }
            _ => {}
        }

        let strict = |key: &str| kwargs.get_bool(key).unwrap_or(false);
        let mut bounds = Vec::new();
        if let Some(value) = min {
            bounds.push(Bound {
                value,
                side: BoundSide::Min,
                strict: strict("strict_min"),
            });
        }
        if let Some(value) = max {
            bounds.push(Bound {
                value,
                side: BoundSide::Max,
                strict: strict("strict_max"),
            });
        }
        Ok(Self {
            bounds,
            allow_cross_type: kwargs.get_bool("allow_cross_type_comparisons").unwrap_or(false),
        })
    }

    /// Checks that a column of `kind` can be compared with every bound.
    ///
    /// Returns false when it cannot and cross-type comparisons are allowed,
    /// which makes every row unexpected.
    #[cfg(any(feature = "sqlite", feature = "polars"))]
    fn comparable_with(&self, kind: ValueKind) -> Result<bool> {
        if kind == ValueKind::Other {
            return Ok(true);
        }
        match self.bounds.iter().find(|b| ValueKind::of(&b.value) != kind) {
            None => Ok(true),
            Some(_) if self.allow_cross_type => Ok(false),
            Some(bound) => Err(cross_type_error(&format!("{:?} column", kind), &bound.value)),
        }
    }

    fn contains(&self, value: &Value) -> Result<bool> {
        for bound in &self.bounds {
            let ordering = match (value, &bound.value) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                if self.allow_cross_type {
                    return Ok(false);
                }
                return Err(cross_type_error(&value.to_string(), &bound.value));
            };
            if !bound.accepts(ordering) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn cross_type_error(left: &str, bound: &Value) -> ExpectationsError {
    ExpectationsError::provider_message(
        BETWEEN.condition_metric_name,
        format!(
            "cannot compare {} with bound {}; set allow_cross_type_comparisons to treat such rows as unexpected",
            left, bound
        ),
    )
}

fn between_table(rows: &[Vec<&Value>], kwargs: &Kwargs) -> Result<Vec<bool>> {
    let bounds = Bounds::from_kwargs(kwargs)?;
    rows.iter().map(|row| bounds.contains(first(row))).collect()
}

#[cfg(feature = "sqlite")]
fn between_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    let bounds = Bounds::from_kwargs(input.value_kwargs)?;
    let column = input.column(0);
    let declared = input
        .column_types
        .first()
        .map_or(ValueKind::Other, |t| ValueKind::of_sql_type(t));

    // Untyped columns compare per storage class, so rows SQLite would order
    // across types are judged like the table engine judges them.
    let guarded = declared == ValueKind::Other;
    if guarded {
        let classes = input.storage_classes.first().map_or(&[][..], Vec::as_slice);
        match ValueKind::of_storage_classes(classes) {
            Some(kind) => {
                if !bounds.comparable_with(kind)? {
                    return Ok("0".to_string());
                }
            }
            None if bounds.allow_cross_type => {}
            None => {
                let bound = bounds.bounds.first().map_or(Value::Null, |b| b.value.clone());
                return Err(cross_type_error(
                    &format!("untyped column holding {}", classes.join(", ")),
                    &bound,
                ));
            }
        }
    } else if !bounds.comparable_with(declared)? {
        return Ok("0".to_string());
    }

    Ok(bounds
        .bounds
        .iter()
        .map(|b| {
            let comparison = format!("{} {} {}", column, b.operator(), sql_literal(&b.value));
            if guarded {
                format!(
                    "{} AND {}",
                    ValueKind::of(&b.value).storage_class_guard(&column),
                    comparison
                )
            } else {
                comparison
            }
        })
        .collect::<Vec<_>>()
        .join(" AND "))
}

#[cfg(feature = "polars")]
fn between_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let bounds = Bounds::from_kwargs(input.value_kwargs)?;
    if !bounds.comparable_with(ValueKind::of_dtype(&frame_dtype(input)))? {
        return Ok(lit(false));
    }
    let column = frame_column(input)?;
    let clauses = bounds.bounds.iter().map(|b| {
        let bound = json_literal(&b.value);
        let column = column.clone();
        match (b.side, b.strict) {
            (BoundSide::Min, true) => column.gt(bound),
            (BoundSide::Min, false) => column.gt_eq(bound),
            (BoundSide::Max, true) => column.lt(bound),
            (BoundSide::Max, false) => column.lt_eq(bound),
        }
    });
    Ok(clauses.reduce(|acc, e| acc.and(e)).unwrap_or(lit(true)))
}

// ============================================================================
// Set membership
// ============================================================================

fn value_set(kwargs: &Kwargs) -> Result<&Vec<Value>> {
    kwargs
        .get_array("value_set")
        .ok_or_else(|| ExpectationsError::configuration("value_set must be a list"))
}

fn in_set_table(rows: &[Vec<&Value>], kwargs: &Kwargs) -> Result<Vec<bool>> {
    let set = value_set(kwargs)?;
    Ok(rows
        .iter()
        .map(|row| {
            let value = first(row);
            set.iter().any(|member| compare_json(value, member).is_eq())
        })
        .collect())
}

#[cfg(feature = "sqlite")]
fn in_set_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    let set = value_set(input.value_kwargs)?;
    if set.is_empty() {
        return Ok("0".to_string());
    }
    Ok(format!(
        "{} IN ({})",
        input.column(0),
        set.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
    ))
}

/// Members of a type the column cannot hold are dropped; comparing them
/// would fail in polars rather than evaluate to false.
#[cfg(feature = "polars")]
fn in_set_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let set = value_set(input.value_kwargs)?;
    let dtype = frame_dtype(input);
    let kind = ValueKind::of_dtype(&dtype);
    let column = frame_column(input)?;
    Ok(set
        .iter()
        .filter(|member| match kind {
            ValueKind::Other if dtype == DataType::Boolean => member.is_boolean(),
            ValueKind::Other => true,
            kind => ValueKind::of(member) == kind,
        })
        .map(|member| column.clone().eq(json_literal(member)))
        .reduce(|acc, e| acc.or(e))
        .unwrap_or(lit(false)))
}

// ============================================================================
// Regex
// ============================================================================

fn compile_regex(kwargs: &Kwargs) -> Result<Regex> {
    let pattern = kwargs.require_str("regex")?;
    Regex::new(pattern).map_err(|e| {
        ExpectationsError::configuration(format!("invalid regex '{}': {}", pattern, e))
    })
}

fn match_regex_table(rows: &[Vec<&Value>], kwargs: &Kwargs) -> Result<Vec<bool>> {
    let regex = compile_regex(kwargs)?;
    Ok(rows
        .iter()
        .map(|row| match first(row) {
            Value::String(s) => regex.is_match(s),
            value @ (Value::Number(_) | Value::Bool(_)) => regex.is_match(&value.to_string()),
            _ => false,
        })
        .collect())
}

#[cfg(feature = "polars")]
fn match_regex_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let regex = compile_regex(input.value_kwargs)?;
    Ok(frame_column(input)?
        .cast(DataType::String)
        .str()
        .contains(lit(regex.as_str().to_string()), true))
}

// ============================================================================
// Uniqueness
// ============================================================================

/// Grouping key under which equal numbers collide regardless of encoding.
fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("n:{}", n.as_f64().unwrap_or(f64::NAN)),
        other => other.to_string(),
    }
}

fn unique_table(rows: &[Vec<&Value>], _: &Kwargs) -> Result<Vec<bool>> {
    let keys: Vec<String> = rows.iter().map(|row| value_key(first(row))).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for key in &keys {
        *counts.entry(key.as_str()).or_default() += 1;
    }
    Ok(keys.iter().map(|key| counts.get(key.as_str()) == Some(&1)).collect())
}

#[cfg(feature = "sqlite")]
fn unique_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    let column = input.column(0);
    Ok(format!(
        "{} IN ({} GROUP BY {} HAVING COUNT(*) = 1)",
        column,
        input.domain.select(&column),
        column
    ))
}

#[cfg(feature = "polars")]
fn unique_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    Ok(len().over([frame_column(input)?]).eq(lit(1)))
}

// ============================================================================
// Extras
// ============================================================================

pub(crate) fn register(registry: &MetricRegistry) -> Result<()> {
    registry.register_metric(MetricRegistration::new(
        NONNULL_COUNT_METRIC,
        "ColumnValuesNonNullCount",
        MetricFnType::Value,
        MetricDomainType::Column,
        MetricFn::table(|call| {
            let domain = call
                .engine
                .get_compute_domain(call.domain_kwargs(), MetricDomainType::Column)?;
            let columns = accessor_columns(&domain.accessor_kwargs, MetricDomainType::Column)?;
            let column = columns.first().map(String::as_str).unwrap_or_default();
            let present = domain
                .handle
                .column(column)?
                .into_iter()
                .filter(|(_, value)| !is_missing(value))
                .count();
            Ok(MetricValue::json(present))
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[Value]) -> Vec<Vec<&Value>> {
        values.iter().map(|v| vec![v]).collect()
    }

    // ========================================================================
    // Between
    // ========================================================================

    #[test]
    fn test_between_bounds() {
        let values = [json!(1), json!(5), json!(10)];
        let kwargs = Kwargs::new().with("min_value", 1).with("max_value", 5);
        assert_eq!(
            between_table(&rows(&values), &kwargs).unwrap(),
            vec![true, true, false]
        );

        let strict = kwargs.clone().with("strict_min", true);
        assert_eq!(
            between_table(&rows(&values), &strict).unwrap(),
            vec![false, true, false]
        );
    }

    #[test]
    fn test_between_rejects_bad_bounds() {
        let both_null = Kwargs::new().with("min_value", Value::Null);
        assert!(matches!(
            Bounds::from_kwargs(&both_null).unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));

        let inverted = Kwargs::new().with("min_value", 5).with("max_value", 1);
        assert!(Bounds::from_kwargs(&inverted).is_err());
    }

    #[test]
    fn test_between_cross_type() {
        let values = [json!("a"), json!(3)];
        let kwargs = Kwargs::new().with("min_value", 1);
        assert!(between_table(&rows(&values), &kwargs).is_err());

        let allowed = kwargs.with("allow_cross_type_comparisons", true);
        assert_eq!(
            between_table(&rows(&values), &allowed).unwrap(),
            vec![false, true]
        );
    }

    // ========================================================================
    // Membership, regex, uniqueness
    // ========================================================================

    #[test]
    fn test_in_set_matches_numeric_encodings() {
        let values = [json!(1.0), json!(2), json!("1")];
        let kwargs = Kwargs::new().with("value_set", json!([1]));
        assert_eq!(
            in_set_table(&rows(&values), &kwargs).unwrap(),
            vec![true, false, false]
        );
        assert!(in_set_table(&rows(&values), &Kwargs::new()).is_err());
    }

    #[test]
    fn test_match_regex() {
        let values = [json!("abc"), json!("xyz"), json!(123)];
        let kwargs = Kwargs::new().with("regex", "^a|\\d");
        assert_eq!(
            match_regex_table(&rows(&values), &kwargs).unwrap(),
            vec![true, false, true]
        );

        let invalid = Kwargs::new().with("regex", "(");
        assert!(matches!(
            match_regex_table(&rows(&values), &invalid).unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));
    }

    #[test]
    fn test_unique_counts_numeric_encodings_together() {
        let values = [json!(1), json!(1.0), json!(2), json!("1")];
        assert_eq!(
            unique_table(&rows(&values), &Kwargs::new()).unwrap(),
            vec![false, false, true, true]
        );
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sql_type_affinity() {
        assert_eq!(ValueKind::of_sql_type("INTEGER"), ValueKind::Numeric);
        assert_eq!(ValueKind::of_sql_type("varchar(20)"), ValueKind::Text);
        assert_eq!(ValueKind::of_sql_type(""), ValueKind::Other);

        let classes = |names: &[&str]| names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>();
        assert_eq!(
            ValueKind::of_storage_classes(&classes(&["integer", "real"])),
            Some(ValueKind::Numeric)
        );
        assert_eq!(ValueKind::of_storage_classes(&[]), Some(ValueKind::Other));
        assert_eq!(ValueKind::of_storage_classes(&classes(&["integer", "text"])), None);
    }
}
