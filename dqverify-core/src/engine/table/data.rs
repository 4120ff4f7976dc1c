//! In-memory table storage and row filtering.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::batch::{Partition, Sampling};
use crate::metric_value::{compare_json, is_missing};
use crate::row_condition::{Condition, Literal};
use crate::{ExpectationsError, Result};

/// Rows of one loaded batch, stored column-positionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TableData {
    /// Creates a table from column names and positional rows.
    ///
    /// Short rows are padded with nulls.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let width = columns.len();
        let mut padded = Vec::with_capacity(rows.len());
        for (position, mut row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(ExpectationsError::invalid_batch_spec(format!(
                    "row {} has {} values for {} columns",
                    position,
                    row.len(),
                    width
                )));
            }
            row.resize(width, Value::Null);
            padded.push(row);
        }
        Ok(Self {
            columns,
            rows: padded,
        })
    }

    /// Builds a table from a JSON array of objects.
    ///
    /// Columns appear in first-seen order; keys missing from a record are null.
    pub fn from_records(records: &Value) -> Result<Self> {
        let Value::Array(items) = records else {
            return Err(ExpectationsError::invalid_batch_spec(
                "records must be a JSON array of objects",
            ));
        };

        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Object(map) => objects.push(map),
                other => {
                    return Err(ExpectationsError::invalid_batch_spec(format!(
                        "records must be objects, got {}",
                        other
                    )));
                }
            }
        }
        Ok(Self::from_objects(&objects))
    }

    fn from_objects(objects: &[&Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for object in objects {
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = objects
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Parses JSON-lines text.
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (line_number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(line).map_err(|e| {
                ExpectationsError::invalid_batch_spec(format!(
                    "line {} is not valid JSON: {}",
                    line_number + 1,
                    e
                ))
            })?;
            records.push(record);
        }
        Self::from_records(&Value::Array(records))
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Positions of several columns; an unknown column is an error.
    pub fn column_indices(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| self.column_index(c).ok_or_else(|| missing_column(c, &self.columns)))
            .collect()
    }

    /// Value at a row and column position.
    pub fn value(&self, row: usize, column: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&Value::Null)
    }

    /// Row as a JSON object.
    pub fn record(&self, row: usize) -> Map<String, Value> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), self.value(row, i).clone()))
            .collect()
    }

    /// Keeps the rows selected by partitioning and sampling, in that order.
    pub(crate) fn restricted(
        self,
        partition: Option<&Partition>,
        sampling: Option<&Sampling>,
    ) -> Result<Self> {
        let mut rows = self.rows;

        if let Some(Partition::ColumnValue { column, value }) = partition {
            let index = position_of(&self.columns, column)?;
            rows.retain(|row| row[index] == *value);
        }

        match sampling {
            Some(Sampling::Limit { n }) => rows.truncate(*n),
            Some(Sampling::Mod {
                column,
                modulo,
                value,
            }) => {
                let index = position_of(&self.columns, column)?;
                rows.retain(|row| {
                    row[index]
                        .as_i64()
                        .is_some_and(|v| v.rem_euclid(*modulo) == *value)
                });
            }
            None => {}
        }

        Ok(Self {
            columns: self.columns,
            rows,
        })
    }
}

fn position_of(columns: &[String], column: &str) -> Result<usize> {
    columns.iter().position(|c| c == column).ok_or_else(|| {
        ExpectationsError::invalid_batch_spec(format!("column '{}' is not in the batch", column))
    })
}

/// A row-filtered, optionally projected view of a [`TableData`].
#[derive(Debug, Clone)]
pub struct TableView {
    data: Arc<TableData>,
    rows: Vec<usize>,
    projection: Vec<String>,
}

impl TableView {
    pub(crate) fn new(data: Arc<TableData>, rows: Vec<usize>, projection: Vec<String>) -> Self {
        Self {
            data,
            rows,
            projection,
        }
    }

    /// Number of rows in the view.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the view has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Positions of the visible rows in the batch.
    pub fn row_indices(&self) -> &[usize] {
        &self.rows
    }

    /// Underlying batch data.
    pub fn data(&self) -> &TableData {
        &self.data
    }

    /// Visible column names.
    pub fn columns(&self) -> Vec<String> {
        if self.projection.is_empty() {
            self.data.columns().to_vec()
        } else {
            self.projection.clone()
        }
    }

    /// `(row index, value)` pairs of one column.
    pub fn column(&self, column: &str) -> Result<Vec<(usize, &Value)>> {
        let index = self.require_column(column)?;
        Ok(self
            .rows
            .iter()
            .map(|row| (*row, self.data.value(*row, index)))
            .collect())
    }

    /// Values of several columns, one entry per visible row.
    pub fn columns_by_row(&self, columns: &[String]) -> Result<Vec<(usize, Vec<&Value>)>> {
        let indices = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .rows
            .iter()
            .map(|row| {
                (
                    *row,
                    indices.iter().map(|i| self.data.value(*row, *i)).collect(),
                )
            })
            .collect())
    }

    /// Projected record of a batch row.
    pub fn record(&self, row: usize) -> Map<String, Value> {
        let mut record = self.data.record(row);
        if !self.projection.is_empty() {
            record.retain(|k, _| self.projection.contains(k));
        }
        record
    }

    /// Visible records.
    pub fn records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| Value::Object(self.record(*row)))
            .collect()
    }

    fn require_column(&self, column: &str) -> Result<usize> {
        self.data.column_index(column).ok_or_else(|| missing_column(column, self.data.columns()))
    }
}

pub(crate) fn missing_column(column: &str, available: &[String]) -> ExpectationsError {
    ExpectationsError::metric_resolution(format!(
        "column '{}' not found in batch; available columns: [{}]",
        column,
        available.join(", ")
    ))
}

/// Evaluates a condition on one row with SQL-style three-valued logic.
///
/// `None` means unknown, which a filter treats as false.
pub(crate) fn evaluate(condition: &Condition, data: &TableData, row: usize) -> Result<Option<bool>> {
    let cell = |column: &str| -> Result<&Value> {
        let index = data
            .column_index(column)
            .ok_or_else(|| missing_column(column, data.columns()))?;
        Ok(data.value(row, index))
    };

    Ok(match condition {
        Condition::Compare { column, op, value } => {
            let cell = cell(column)?;
            if is_missing(cell) {
                None
            } else {
                compare_literal(cell, value).map(|ordering| op.holds(ordering))
            }
        }
        Condition::IsNull(column) => Some(is_missing(cell(column)?)),
        Condition::NotNull(column) => Some(!is_missing(cell(column)?)),
        Condition::And(a, b) => match (evaluate(a, data, row)?, evaluate(b, data, row)?) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Condition::Or(a, b) => match (evaluate(a, data, row)?, evaluate(b, data, row)?) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Condition::Not(inner) => evaluate(inner, data, row)?.map(|v| !v),
    })
}

/// Orders a cell against a literal; incomparable types yield `None`.
fn compare_literal(cell: &Value, literal: &Literal) -> Option<Ordering> {
    match (cell, literal) {
        (Value::Number(_), Literal::Number(_))
        | (Value::String(_), Literal::String(_))
        | (Value::Bool(_), Literal::Bool(_)) => Some(compare_json(cell, &literal.to_json())),
        _ => None,
    }
}

/// JSON type name reported by `table.column_types`.
pub(crate) fn json_type_name(values: impl Iterator<Item = Value>) -> &'static str {
    let mut seen: Option<&'static str> = None;
    for value in values {
        let name = match &value {
            Value::Null => continue,
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        seen = match (seen, name) {
            (None, name) => Some(name),
            (Some("integer"), "float") | (Some("float"), "integer") => Some("float"),
            (Some(prev), name) if prev == name => Some(prev),
            _ => return "mixed",
        };
    }
    seen.unwrap_or("null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_condition::ConditionParser;
    use serde_json::json;

    fn table() -> TableData {
        TableData::from_records(&json!([
            {"a": 1, "b": "x"},
            {"a": null, "b": "y"},
            {"a": 3},
        ]))
        .unwrap()
    }

    #[test]
    fn test_from_records_fills_missing_keys() {
        let data = table();
        assert_eq!(data.columns(), ["a", "b"]);
        assert_eq!(data.value(2, 1), &Value::Null);
        assert_eq!(data.row_count(), 3);
    }

    #[test]
    fn test_from_records_rejects_scalars() {
        assert!(TableData::from_records(&json!([1, 2])).is_err());
        assert!(TableData::from_records(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_null_comparisons_are_unknown() {
        let data = table();
        let condition = ConditionParser::GreatExpectations
            .parse("col(\"a\") > 1")
            .unwrap();
        assert_eq!(evaluate(&condition, &data, 0).unwrap(), Some(false));
        assert_eq!(evaluate(&condition, &data, 1).unwrap(), None);
        assert_eq!(evaluate(&condition, &data, 2).unwrap(), Some(true));

        let negated = ConditionParser::GreatExpectations
            .parse("~(col(\"a\") > 1)")
            .unwrap();
        assert_eq!(evaluate(&negated, &data, 1).unwrap(), None);
    }

    #[test]
    fn test_unknown_column_in_condition() {
        let data = table();
        let condition = ConditionParser::GreatExpectations
            .parse("col(\"zzz\") > 1")
            .unwrap();
        assert!(evaluate(&condition, &data, 0).is_err());
    }

    #[test]
    fn test_sampling_and_partition() {
        let data = TableData::from_records(&json!([
            {"id": 1, "g": "a"}, {"id": 2, "g": "b"}, {"id": 3, "g": "a"}, {"id": 4, "g": "a"}
        ]))
        .unwrap();

        let partitioned = data
            .clone()
            .restricted(
                Some(&Partition::ColumnValue {
                    column: "g".into(),
                    value: json!("a"),
                }),
                Some(&Sampling::Limit { n: 2 }),
            )
            .unwrap();
        assert_eq!(partitioned.row_count(), 2);

        let sampled = data
            .restricted(
                None,
                Some(&Sampling::Mod {
                    column: "id".into(),
                    modulo: 2,
                    value: 0,
                }),
            )
            .unwrap();
        assert_eq!(sampled.row_count(), 2);
    }

    #[test]
    fn test_json_type_name() {
        assert_eq!(json_type_name([json!(1), json!(null)].into_iter()), "integer");
        assert_eq!(json_type_name([json!(1), json!(1.5)].into_iter()), "float");
        assert_eq!(json_type_name([json!(1), json!("a")].into_iter()), "mixed");
        assert_eq!(json_type_name(std::iter::empty()), "null");
    }
}
