//! Conversions between dataframes and JSON.

use polars::prelude::*;
use serde_json::{Map, Value};

use crate::metric_value::f64_to_json;
use crate::row_condition::{CompareOp, Condition, Literal};
use crate::{ExpectationsError, Result};

fn frame_error(context: &str) -> impl FnOnce(PolarsError) -> ExpectationsError + '_ {
    move |e| ExpectationsError::frame_failed(context, e)
}

/// Converts one cell to JSON.
pub fn any_value_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int32(i) => Value::Number(i.into()),
        AnyValue::Int64(i) => Value::Number(i.into()),
        AnyValue::UInt32(u) => Value::Number(u.into()),
        AnyValue::UInt64(u) => Value::Number(u.into()),
        AnyValue::Float32(f) => f64_to_json(f64::from(f)),
        AnyValue::Float64(f) => f64_to_json(f),
        other => Value::String(other.to_string()),
    }
}

/// Values of a series as JSON, in row order.
pub fn series_to_json(series: &Series) -> Result<Vec<Value>> {
    let dtype = series.dtype();
    let widened;
    let series = if dtype.is_integer() && !matches!(dtype, DataType::Int64 | DataType::UInt64) {
        widened = series
            .cast(&DataType::Int64)
            .map_err(frame_error("Failed to widen integer column"))?;
        &widened
    } else {
        series
    };

    (0..series.len())
        .map(|i| {
            series
                .get(i)
                .map(any_value_to_json)
                .map_err(frame_error("Failed to read dataframe value"))
        })
        .collect()
}

/// Rows of a dataframe as JSON objects.
pub fn frame_to_records(frame: &DataFrame) -> Result<Value> {
    let columns = frame
        .get_columns()
        .iter()
        .map(|s| Ok((s.name().to_string(), series_to_json(s)?)))
        .collect::<Result<Vec<_>>>()?;

    let records = (0..frame.height())
        .map(|row| {
            let record: Map<String, Value> = columns
                .iter()
                .map(|(name, values)| (name.clone(), values.get(row).cloned().unwrap_or(Value::Null)))
                .collect();
            Value::Object(record)
        })
        .collect();
    Ok(Value::Array(records))
}

/// Values of the named columns, one inner vector per row.
pub fn frame_rows(frame: &DataFrame, columns: &[String]) -> Result<Vec<Vec<Value>>> {
    let values = columns
        .iter()
        .map(|name| {
            let series = frame
                .column(name)
                .map_err(frame_error("Failed to read dataframe column"))?;
            series_to_json(series)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((0..frame.height())
        .map(|row| {
            values
                .iter()
                .map(|column| column.get(row).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect())
}

/// Builds a dataframe from a JSON array of objects.
///
/// Column types are inferred: booleans, integers, floats, strings; columns
/// mixing kinds are stored as strings.
pub fn records_to_frame(records: &Value) -> Result<DataFrame> {
    let Value::Array(items) = records else {
        return Err(ExpectationsError::invalid_batch_spec(
            "records must be a JSON array of objects",
        ));
    };

    let mut columns: Vec<String> = Vec::new();
    for item in items {
        let Value::Object(map) = item else {
            return Err(ExpectationsError::invalid_batch_spec(format!(
                "records must be objects, got {}",
                item
            )));
        };
        for key in map.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let series = columns
        .iter()
        .map(|name| {
            let values: Vec<&Value> = items
                .iter()
                .map(|item| item.get(name).unwrap_or(&Value::Null))
                .collect();
            column_to_series(name, &values)
        })
        .collect::<Vec<_>>();

    DataFrame::new(series).map_err(frame_error("Failed to build dataframe from records"))
}

fn column_to_series(name: &str, values: &[&Value]) -> Series {
    let present = values.iter().filter(|v| !v.is_null());
    let all = |f: fn(&Value) -> bool| present.clone().all(|v| f(v));

    if present.clone().next().is_none() {
        Series::new(name, vec![None::<f64>; values.len()])
    } else if all(Value::is_boolean) {
        Series::new(name, values.iter().map(|v| v.as_bool()).collect::<Vec<_>>())
    } else if all(Value::is_i64) {
        Series::new(name, values.iter().map(|v| v.as_i64()).collect::<Vec<_>>())
    } else if all(Value::is_number) {
        Series::new(name, values.iter().map(|v| v.as_f64()).collect::<Vec<_>>())
    } else {
        Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<Vec<_>>(),
        )
    }
}

/// Literal expression for a JSON scalar.
pub fn json_literal(value: &Value) -> Expr {
    match value {
        Value::Bool(b) => lit(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => lit(i),
            None => lit(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => lit(s.clone()),
        Value::Null => lit(Null {}),
        other => lit(other.to_string()),
    }
}

/// Lowers a row condition to a boolean expression.
///
/// NaN in a float column counts as null, matching the `nonnull` and `null`
/// map conditions.
pub fn condition_to_expr(condition: &Condition, schema: &Schema) -> Expr {
    match condition {
        Condition::Compare { column, op, value } => {
            let right = match value {
                #[allow(clippy::cast_possible_truncation)]
                Literal::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => lit(*n as i64),
                Literal::Number(n) => lit(*n),
                Literal::String(s) => lit(s.clone()),
                Literal::Bool(b) => lit(*b),
            };
            let left = col(column);
            match op {
                CompareOp::Eq => left.eq(right),
                CompareOp::Ne => left.neq(right),
                CompareOp::Gt => left.gt(right),
                CompareOp::Ge => left.gt_eq(right),
                CompareOp::Lt => left.lt(right),
                CompareOp::Le => left.lt_eq(right),
            }
        }
        Condition::IsNull(column) => missing_expr(column, schema),
        Condition::NotNull(column) => missing_expr(column, schema).not(),
        Condition::And(a, b) => condition_to_expr(a, schema).and(condition_to_expr(b, schema)),
        Condition::Or(a, b) => condition_to_expr(a, schema).or(condition_to_expr(b, schema)),
        Condition::Not(inner) => condition_to_expr(inner, schema).not(),
    }
}

/// True where a column value is null, or NaN for float columns.
pub fn missing_expr(column: &str, schema: &Schema) -> Expr {
    let nulls = col(column).is_null();
    match schema.get(column) {
        Some(dtype) if dtype.is_float() => nulls.or(col(column).is_nan().fill_null(lit(false))),
        _ => nulls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_round_trip_types() {
        let records = json!([
            {"i": 1, "f": 1.5, "s": "a", "b": true, "n": null},
            {"i": null, "f": 2, "s": null, "b": false, "n": null},
        ]);
        let frame = records_to_frame(&records).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("i").unwrap().dtype(), &DataType::Int64);
        assert_eq!(frame.column("f").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("s").unwrap().dtype(), &DataType::String);
        assert_eq!(frame.column("b").unwrap().dtype(), &DataType::Boolean);

        let back = frame_to_records(&frame).unwrap();
        assert_eq!(back[0]["i"], json!(1));
        assert_eq!(back[1]["i"], Value::Null);
        assert_eq!(back[1]["f"], json!(2.0));
        assert_eq!(back[0]["s"], json!("a"));
    }

    #[test]
    fn test_condition_filter() {
        let frame = records_to_frame(&json!([{"a": 1}, {"a": 5}, {"a": null}])).unwrap();
        let condition = crate::row_condition::ConditionParser::Spark
            .parse("a > 2 OR a IS NULL")
            .unwrap();
        let schema = frame.schema();
        let filtered = frame
            .lazy()
            .filter(condition_to_expr(&condition, &schema))
            .collect()
            .unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn test_not_null_filter_drops_nan() {
        let frame = df!("a" => [Some(f64::NAN), None, Some(1.0), Some(f64::NAN)]).unwrap();
        let schema = frame.schema();
        let kept = frame
            .clone()
            .lazy()
            .filter(condition_to_expr(&Condition::NotNull("a".to_string()), &schema))
            .collect()
            .unwrap();
        assert_eq!(kept.height(), 1);

        let missing = frame
            .lazy()
            .filter(condition_to_expr(&Condition::IsNull("a".to_string()), &schema))
            .collect()
            .unwrap();
        assert_eq!(missing.height(), 3);
    }
}
