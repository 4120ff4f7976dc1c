//! SQL text helpers: identifier quoting, literals, selectables and the
//! lowering of row conditions to `WHERE` fragments.

use serde_json::Value;
use sqlx::Row;

use crate::row_condition::{Condition, Literal};

/// Quotes a SQLite identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders a JSON scalar as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// A `FROM` target plus an optional row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSelectable {
    /// Text after `FROM`: a quoted table or an aliased subquery
    pub from: String,
    /// Boolean expression restricting rows
    pub filter: Option<String>,
}

impl SqlSelectable {
    /// Selectable over a whole table or subquery.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            filter: None,
        }
    }

    /// Returns a copy whose filter also requires `predicate`.
    pub fn and_where(&self, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        Self {
            from: self.from.clone(),
            filter: Some(match &self.filter {
                Some(existing) => format!("({}) AND ({})", existing, predicate),
                None => predicate,
            }),
        }
    }

    /// `FROM ... [WHERE ...]`
    pub fn from_clause(&self) -> String {
        match &self.filter {
            Some(filter) => format!("FROM {} WHERE {}", self.from, filter),
            None => format!("FROM {}", self.from),
        }
    }

    /// `SELECT <columns> FROM ... [WHERE ...]`
    pub fn select(&self, columns: &str) -> String {
        format!("SELECT {} {}", columns, self.from_clause())
    }

    /// The selectable as an aliased subquery usable after `FROM`.
    pub fn as_subquery(&self, alias: &str) -> String {
        format!("({}) AS {}", self.select("*"), quote_identifier(alias))
    }
}

/// Lowers a row condition to a SQL boolean expression.
pub fn condition_to_sql(condition: &Condition) -> String {
    match condition {
        Condition::Compare { column, op, value } => {
            let literal = match value {
                #[allow(clippy::cast_possible_truncation)]
                Literal::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => (*n as i64).to_string(),
                Literal::Number(n) => n.to_string(),
                other => sql_literal(&other.to_json()),
            };
            format!("{} {} {}", quote_identifier(column), op.sql(), literal)
        }
        Condition::IsNull(column) => format!("{} IS NULL", quote_identifier(column)),
        Condition::NotNull(column) => format!("{} IS NOT NULL", quote_identifier(column)),
        Condition::And(a, b) => format!("({}) AND ({})", condition_to_sql(a), condition_to_sql(b)),
        Condition::Or(a, b) => format!("({}) OR ({})", condition_to_sql(a), condition_to_sql(b)),
        Condition::Not(inner) => format!("NOT ({})", condition_to_sql(inner)),
    }
}

/// One fetched row, values positionally aligned with `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRecord {
    /// Column names
    pub columns: Vec<String>,
    /// Values
    pub values: Vec<Value>,
}

impl SqlRecord {
    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Row as a JSON object.
    pub fn to_object(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .cloned()
                .zip(self.values.iter().cloned())
                .collect(),
        )
    }
}

/// Converts a SQLite row into a record.
pub(crate) fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> SqlRecord {
    use sqlx::Column;

    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..columns.len()).map(|i| extract_value(row, i)).collect();
    SqlRecord { columns, values }
}

/// Extracts a column value as JSON.
///
/// SQLite is dynamically typed, so each storage class is tried in turn
/// against the value's runtime type.
fn extract_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(Value::Null, |n| Value::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map_or(Value::Null, crate::metric_value::f64_to_json);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(Value::Null, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(Value::Null, |bytes| {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            Value::String(format!("base64:{}", encoded))
        });
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_condition::ConditionParser;
    use serde_json::json;

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(quote_identifier("a"), "\"a\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_literals() {
        assert_eq!(sql_literal(&json!("it's")), "'it''s'");
        assert_eq!(sql_literal(&json!(3)), "3");
        assert_eq!(sql_literal(&json!(true)), "1");
        assert_eq!(sql_literal(&Value::Null), "NULL");
    }

    #[test]
    fn test_condition_lowering() {
        let condition = ConditionParser::GreatExpectations
            .parse("col(\"a\") > 1 & ~col(\"b\").isnull()")
            .unwrap();
        assert_eq!(
            condition_to_sql(&condition),
            "(\"a\" > 1) AND (NOT (\"b\" IS NULL))"
        );
    }

    #[test]
    fn test_selectable_composition() {
        let selectable = SqlSelectable::new("\"t\"").and_where("\"a\" > 1");
        assert_eq!(selectable.select("COUNT(*)"), "SELECT COUNT(*) FROM \"t\" WHERE \"a\" > 1");
        let narrowed = selectable.and_where("\"b\" IS NOT NULL");
        assert_eq!(
            narrowed.from_clause(),
            "FROM \"t\" WHERE (\"a\" > 1) AND (\"b\" IS NOT NULL)"
        );
    }
}
