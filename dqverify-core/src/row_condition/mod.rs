//! Row conditions.
//!
//! `row_condition` text is parsed once into a [`Condition`] tree; each engine
//! lowers the tree into its own predicate form. Three surface syntaxes are
//! understood, selected by `condition_parser`:
//!
//! - `great_expectations__experimental__`: `col("x") > 5 & ~col("y").isnull()`
//! - `pandas`: `x > 5 and not y.isnull()`, with backtick identifiers
//! - `spark`: `x > 5 AND y IS NOT NULL`
//!
//! Not every engine accepts every syntax; see [`ConditionParser::supported_by`].

mod parser;

use serde_json::Value;

use crate::domain::{CONDITION_PARSER_KEY, FILTER_CONDITIONS_KEY, ROW_CONDITION_KEY};
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::{ExpectationsError, Result};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl CompareOp {
    /// SQL spelling.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Applies the operator to an ordering.
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
        }
    }
}

/// Literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Bool(bool),
}

impl Literal {
    /// JSON form of the literal.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => crate::metric_value::f64_to_json(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Parsed row condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column <op> literal`
    Compare {
        /// Column name
        column: String,
        /// Operator
        op: CompareOp,
        /// Right-hand side
        value: Literal,
    },
    /// Column is null
    IsNull(String),
    /// Column is not null
    NotNull(String),
    /// Both hold
    And(Box<Condition>, Box<Condition>),
    /// Either holds
    Or(Box<Condition>, Box<Condition>),
    /// Negation
    Not(Box<Condition>),
}

impl Condition {
    /// Conjunction of two conditions.
    pub fn and(self, other: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// Columns referenced by the condition, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, .. } | Self::IsNull(column) | Self::NotNull(column) => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Self::Not(inner) => inner.collect_columns(out),
        }
    }
}

/// Surface syntax of a row condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionParser {
    /// `col("x") > 5 & col("y").notnull()`
    GreatExpectations,
    /// pandas `DataFrame.query` style
    Pandas,
    /// Spark SQL style
    Spark,
}

impl ConditionParser {
    /// Parser name as written in `condition_parser`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreatExpectations => "great_expectations__experimental__",
            Self::Pandas => "pandas",
            Self::Spark => "spark",
        }
    }

    /// Looks a parser up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "great_expectations__experimental__" => Some(Self::GreatExpectations),
            "pandas" => Some(Self::Pandas),
            "spark" => Some(Self::Spark),
            _ => None,
        }
    }

    /// Returns true if the engine accepts conditions in this syntax.
    pub fn supported_by(&self, engine: EngineType) -> bool {
        match self {
            Self::GreatExpectations => true,
            Self::Pandas => engine == EngineType::Table,
            Self::Spark => engine == EngineType::Frame,
        }
    }

    /// Parses condition text.
    pub fn parse(&self, text: &str) -> Result<Condition> {
        parser::parse(text, *self)
    }
}

/// Builds the combined row filter described by compute domain kwargs.
///
/// `row_condition` is parsed with `condition_parser` (default
/// `great_expectations__experimental__`); each `filter_conditions` entry is
/// parsed with the experimental syntax. All parts are AND-ed. Returns `None`
/// when no filter applies.
pub fn row_filter_from_kwargs(kwargs: &Kwargs, engine: EngineType) -> Result<Option<Condition>> {
    let mut parts = Vec::new();

    if let Some(text) = kwargs.get_str(ROW_CONDITION_KEY)
        && !text.trim().is_empty()
    {
        let parser_name = kwargs
            .get_str(CONDITION_PARSER_KEY)
            .unwrap_or(ConditionParser::GreatExpectations.as_str());
        let parser = ConditionParser::from_name(parser_name)
            .filter(|p| p.supported_by(engine))
            .ok_or_else(|| ExpectationsError::unsupported_condition_parser(parser_name, engine))?;
        parts.push(parser.parse(text)?);
    } else if let Some(parser_name) = kwargs.get_str(CONDITION_PARSER_KEY)
        && ConditionParser::from_name(parser_name).is_none()
    {
        return Err(ExpectationsError::unsupported_condition_parser(parser_name, engine));
    }

    if let Some(filters) = kwargs.get_array(FILTER_CONDITIONS_KEY) {
        for filter in filters {
            let text = filter.as_str().ok_or_else(|| {
                ExpectationsError::configuration(format!(
                    "filter_conditions entries must be strings, got {}",
                    filter
                ))
            })?;
            parts.push(ConditionParser::GreatExpectations.parse(text)?);
        }
    }

    Ok(parts.into_iter().reduce(Condition::and))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsers_per_engine() {
        assert!(ConditionParser::GreatExpectations.supported_by(EngineType::Sql));
        assert!(ConditionParser::Pandas.supported_by(EngineType::Table));
        assert!(!ConditionParser::Pandas.supported_by(EngineType::Sql));
        assert!(ConditionParser::Spark.supported_by(EngineType::Frame));
        assert!(!ConditionParser::Spark.supported_by(EngineType::Table));
    }

    #[test]
    fn test_unknown_parser_is_named_in_error() {
        let kwargs = Kwargs::new()
            .with("row_condition", "a > 1")
            .with("condition_parser", "sql");
        let err = row_filter_from_kwargs(&kwargs, EngineType::Table).unwrap_err();
        assert!(matches!(
            err,
            ExpectationsError::UnsupportedConditionParser { ref parser, .. } if parser == "sql"
        ));
    }

    #[test]
    fn test_parser_not_supported_by_engine() {
        let kwargs = Kwargs::new()
            .with("row_condition", "a > 1")
            .with("condition_parser", "pandas");
        let err = row_filter_from_kwargs(&kwargs, EngineType::Sql).unwrap_err();
        assert!(err.to_string().contains("pandas"));
        assert!(err.to_string().contains("SqlExecutionEngine"));
    }

    #[test]
    fn test_filters_are_and_ed() {
        let kwargs = Kwargs::new()
            .with("row_condition", "col(\"a\") > 1")
            .with("condition_parser", "great_expectations__experimental__")
            .with("filter_conditions", vec!["col(\"b\").notnull()"]);
        let filter = row_filter_from_kwargs(&kwargs, EngineType::Sql)
            .unwrap()
            .unwrap();
        assert_eq!(filter.columns(), vec!["a", "b"]);
        assert!(matches!(filter, Condition::And(_, _)));
    }

    #[test]
    fn test_no_filter() {
        assert!(
            row_filter_from_kwargs(&Kwargs::new(), EngineType::Table)
                .unwrap()
                .is_none()
        );
    }
}
