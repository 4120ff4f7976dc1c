//! Metric domains and the compute/accessor kwargs split.
//!
//! A metric reads data through a *domain*: the whole table, one column, a
//! pair of columns, a list of columns, or an identity projection. Domain
//! kwargs carry both the selection of rows (`batch_id`, `row_condition`,
//! `filter_conditions`, ...) and the selection of columns (`column`,
//! `column_A`, ...). Engines apply the row part once and hand the column
//! part to the provider; [`Domain::split`] is that partition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kwargs::Kwargs;
use crate::{ExpectationsError, Result};

/// Selects the batch a metric reads from.
pub const BATCH_ID_KEY: &str = "batch_id";
/// Row filter expression.
pub const ROW_CONDITION_KEY: &str = "row_condition";
/// Parser used for `row_condition`.
pub const CONDITION_PARSER_KEY: &str = "condition_parser";
/// Extra row filters AND-ed with `row_condition`.
pub const FILTER_CONDITIONS_KEY: &str = "filter_conditions";
/// Row skipping policy for pair and multicolumn domains.
pub const IGNORE_ROW_IF_KEY: &str = "ignore_row_if";
/// Accessor key for column domains.
pub const COLUMN_KEY: &str = "column";
/// First accessor key for column pair domains.
pub const COLUMN_A_KEY: &str = "column_A";
/// Second accessor key for column pair domains.
pub const COLUMN_B_KEY: &str = "column_B";
/// Accessor key for multicolumn domains.
pub const COLUMN_LIST_KEY: &str = "column_list";
/// Accepted synonym for [`COLUMN_LIST_KEY`].
pub const COLUMNS_KEY: &str = "columns";

/// The kind of data a metric reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDomainType {
    /// Whole batch
    Table,
    /// One column
    Column,
    /// Two columns compared row by row
    ColumnPair,
    /// Several columns combined row by row
    Multicolumn,
    /// Rows projected to the named columns; nothing moves to the accessor
    Identity,
}

impl MetricDomainType {
    /// Returns the lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Column => "column",
            Self::ColumnPair => "column_pair",
            Self::Multicolumn => "multicolumn",
            Self::Identity => "identity",
        }
    }

    /// Keys moved to the accessor kwargs for this domain type.
    pub fn accessor_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Column => &[COLUMN_KEY],
            Self::ColumnPair => &[COLUMN_A_KEY, COLUMN_B_KEY],
            Self::Multicolumn => &[COLUMN_LIST_KEY, COLUMNS_KEY],
            Self::Table | Self::Identity => &[],
        }
    }

    /// Default domain keys accepted by metrics of this domain type.
    pub fn default_domain_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Table | Self::Identity => {
                &[BATCH_ID_KEY, "table", ROW_CONDITION_KEY, CONDITION_PARSER_KEY]
            }
            Self::Column => &[
                BATCH_ID_KEY,
                "table",
                COLUMN_KEY,
                ROW_CONDITION_KEY,
                CONDITION_PARSER_KEY,
            ],
            Self::ColumnPair => &[
                BATCH_ID_KEY,
                "table",
                COLUMN_A_KEY,
                COLUMN_B_KEY,
                ROW_CONDITION_KEY,
                CONDITION_PARSER_KEY,
                IGNORE_ROW_IF_KEY,
            ],
            Self::Multicolumn => &[
                BATCH_ID_KEY,
                "table",
                COLUMN_LIST_KEY,
                COLUMNS_KEY,
                ROW_CONDITION_KEY,
                CONDITION_PARSER_KEY,
                IGNORE_ROW_IF_KEY,
            ],
        }
    }
}

impl std::fmt::Display for MetricDomainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-batch domain.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDomain {
    /// Row-selection kwargs
    pub kwargs: Kwargs,
}

/// Single-column domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDomain {
    /// Accessor column
    pub column: String,
    /// Remaining row-selection kwargs
    pub rest: Kwargs,
}

/// Column pair domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPairDomain {
    /// Left column
    pub column_a: String,
    /// Right column
    pub column_b: String,
    /// Remaining row-selection kwargs
    pub rest: Kwargs,
}

/// Multicolumn domain.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticolumnDomain {
    /// Accessor columns, in declaration order
    pub columns: Vec<String>,
    /// Key the column list was supplied under
    pub key: &'static str,
    /// Remaining row-selection kwargs
    pub rest: Kwargs,
}

/// Identity domain: everything stays in the compute kwargs.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityDomain {
    /// All kwargs
    pub kwargs: Kwargs,
}

/// A parsed metric domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// Whole batch
    Table(TableDomain),
    /// One column
    Column(ColumnDomain),
    /// Two columns
    ColumnPair(ColumnPairDomain),
    /// Several columns
    Multicolumn(MulticolumnDomain),
    /// Projection
    Identity(IdentityDomain),
}

/// Result of splitting domain kwargs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitDomainKwargs {
    /// Kwargs applied by the engine when building the compute handle
    pub compute: Kwargs,
    /// Kwargs the provider uses to pick columns out of the handle
    pub accessor: Kwargs,
}

impl Domain {
    /// Parses domain kwargs for the given domain type.
    ///
    /// A missing accessor key is a configuration error.
    pub fn from_kwargs(kwargs: &Kwargs, domain_type: MetricDomainType) -> Result<Self> {
        match domain_type {
            MetricDomainType::Table => Ok(Self::Table(TableDomain {
                kwargs: kwargs.clone(),
            })),
            MetricDomainType::Identity => Ok(Self::Identity(IdentityDomain {
                kwargs: kwargs.clone(),
            })),
            MetricDomainType::Column => {
                let column = required_column(kwargs, COLUMN_KEY)?;
                Ok(Self::Column(ColumnDomain {
                    column,
                    rest: kwargs.without(&[COLUMN_KEY]),
                }))
            }
            MetricDomainType::ColumnPair => {
                let column_a = required_column(kwargs, COLUMN_A_KEY)?;
                let column_b = required_column(kwargs, COLUMN_B_KEY)?;
                Ok(Self::ColumnPair(ColumnPairDomain {
                    column_a,
                    column_b,
                    rest: kwargs.without(&[COLUMN_A_KEY, COLUMN_B_KEY]),
                }))
            }
            MetricDomainType::Multicolumn => {
                let key = if kwargs.contains_key(COLUMN_LIST_KEY) {
                    COLUMN_LIST_KEY
                } else if kwargs.contains_key(COLUMNS_KEY) {
                    COLUMNS_KEY
                } else {
                    return Err(ExpectationsError::configuration(
                        "multicolumn domain requires 'column_list' (or 'columns')",
                    ));
                };
                let columns = kwargs.get_str_list(key).ok_or_else(|| {
                    ExpectationsError::configuration(format!("'{}' must be a list of names", key))
                })?;
                if columns.is_empty() {
                    return Err(ExpectationsError::configuration(format!(
                        "'{}' must name at least one column",
                        key
                    )));
                }
                Ok(Self::Multicolumn(MulticolumnDomain {
                    columns,
                    key,
                    rest: kwargs.without(&[key]),
                }))
            }
        }
    }

    /// Domain type of this domain.
    pub fn domain_type(&self) -> MetricDomainType {
        match self {
            Self::Table(_) => MetricDomainType::Table,
            Self::Column(_) => MetricDomainType::Column,
            Self::ColumnPair(_) => MetricDomainType::ColumnPair,
            Self::Multicolumn(_) => MetricDomainType::Multicolumn,
            Self::Identity(_) => MetricDomainType::Identity,
        }
    }

    /// Partitions the kwargs into compute and accessor parts.
    ///
    /// The union of both parts is always the original kwargs.
    pub fn split(&self) -> SplitDomainKwargs {
        match self {
            Self::Table(d) => SplitDomainKwargs {
                compute: d.kwargs.clone(),
                accessor: Kwargs::new(),
            },
            Self::Identity(d) => SplitDomainKwargs {
                compute: d.kwargs.clone(),
                accessor: Kwargs::new(),
            },
            Self::Column(d) => SplitDomainKwargs {
                compute: d.rest.clone(),
                accessor: Kwargs::new().with(COLUMN_KEY, d.column.clone()),
            },
            Self::ColumnPair(d) => SplitDomainKwargs {
                compute: d.rest.clone(),
                accessor: Kwargs::new()
                    .with(COLUMN_A_KEY, d.column_a.clone())
                    .with(COLUMN_B_KEY, d.column_b.clone()),
            },
            Self::Multicolumn(d) => SplitDomainKwargs {
                compute: d.rest.clone(),
                accessor: Kwargs::new().with(d.key, d.columns.clone()),
            },
        }
    }

    /// Columns an identity handle is projected to.
    ///
    /// Empty means "all columns".
    pub fn projection(&self) -> Vec<String> {
        match self {
            Self::Identity(d) => projection_columns(&d.kwargs),
            _ => Vec::new(),
        }
    }

    /// Columns named by the accessor part, in declaration order.
    pub fn accessor_columns(&self) -> Vec<String> {
        match self {
            Self::Table(_) | Self::Identity(_) => Vec::new(),
            Self::Column(d) => vec![d.column.clone()],
            Self::ColumnPair(d) => vec![d.column_a.clone(), d.column_b.clone()],
            Self::Multicolumn(d) => d.columns.clone(),
        }
    }
}

/// Splits domain kwargs for the given domain type.
pub fn split_domain_kwargs(
    kwargs: &Kwargs,
    domain_type: MetricDomainType,
) -> Result<SplitDomainKwargs> {
    Ok(Domain::from_kwargs(kwargs, domain_type)?.split())
}

fn required_column(kwargs: &Kwargs, key: &str) -> Result<String> {
    match kwargs.get(key) {
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        Some(other) if !other.is_null() => Err(ExpectationsError::configuration(format!(
            "'{}' must be a column name, got {}",
            key, other
        ))),
        _ => Err(ExpectationsError::configuration(format!(
            "domain kwargs are missing required key '{}'",
            key
        ))),
    }
}

fn projection_columns(kwargs: &Kwargs) -> Vec<String> {
    let mut columns = Vec::new();
    for key in [COLUMN_KEY, COLUMN_A_KEY, COLUMN_B_KEY] {
        if let Some(name) = kwargs.get_str(key) {
            columns.push(name.to_string());
        }
    }
    for key in [COLUMN_LIST_KEY, COLUMNS_KEY] {
        if let Some(names) = kwargs.get_str_list(key) {
            columns.extend(names);
        }
    }
    columns
}

/// Returns a copy of `kwargs` whose `filter_conditions` also excludes nulls in
/// `column`.
///
/// The filter is expressed in the experimental condition syntax so every
/// engine can apply it. Adding the same filter twice is a no-op.
pub fn add_column_null_filter(kwargs: &Kwargs, column: &str) -> Kwargs {
    let condition = format!("col(\"{}\").notnull()", column.replace('"', "\\\""));
    let mut filters = kwargs
        .get_array(FILTER_CONDITIONS_KEY)
        .cloned()
        .unwrap_or_default();
    if !filters.iter().any(|f| f.as_str() == Some(condition.as_str())) {
        filters.push(Value::String(condition));
    }
    kwargs.clone().with(FILTER_CONDITIONS_KEY, filters)
}

/// Row skipping policy for column pair domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairIgnoreRowIf {
    /// Skip rows where both values are null
    #[default]
    BothValuesAreMissing,
    /// Skip rows where either value is null
    EitherValueIsMissing,
    /// Keep every row
    Neither,
}

impl PairIgnoreRowIf {
    /// Reads the policy from compute kwargs.
    pub fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        match kwargs.get_str(IGNORE_ROW_IF_KEY) {
            None | Some("both_values_are_missing") => Ok(Self::BothValuesAreMissing),
            Some("either_value_is_missing") => Ok(Self::EitherValueIsMissing),
            Some("neither") => Ok(Self::Neither),
            Some(other) => Err(ExpectationsError::configuration(format!(
                "unknown ignore_row_if '{}' for a column pair domain",
                other
            ))),
        }
    }

    /// Returns true if a row with these null flags is skipped.
    pub fn skips(&self, a_missing: bool, b_missing: bool) -> bool {
        match self {
            Self::BothValuesAreMissing => a_missing && b_missing,
            Self::EitherValueIsMissing => a_missing || b_missing,
            Self::Neither => false,
        }
    }
}

/// Row skipping policy for multicolumn domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MulticolumnIgnoreRowIf {
    /// Skip rows where every value is null
    #[default]
    AllValuesAreMissing,
    /// Skip rows where any value is null
    AnyValueIsMissing,
    /// Keep every row
    Never,
}

impl MulticolumnIgnoreRowIf {
    /// Reads the policy from compute kwargs.
    pub fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        match kwargs.get_str(IGNORE_ROW_IF_KEY) {
            None | Some("all_values_are_missing") => Ok(Self::AllValuesAreMissing),
            Some("any_value_is_missing") => Ok(Self::AnyValueIsMissing),
            Some("never") => Ok(Self::Never),
            Some(other) => Err(ExpectationsError::configuration(format!(
                "unknown ignore_row_if '{}' for a multicolumn domain",
                other
            ))),
        }
    }

    /// Returns true if a row with these null flags is skipped.
    pub fn skips(&self, missing: &[bool]) -> bool {
        match self {
            Self::AllValuesAreMissing => !missing.is_empty() && missing.iter().all(|m| *m),
            Self::AnyValueIsMissing => missing.iter().any(|m| *m),
            Self::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_column_split() {
        let kwargs = Kwargs::new()
            .with("column", "a")
            .with("row_condition", "col(\"b\") > 1")
            .with("condition_parser", "great_expectations__experimental__");
        let split = split_domain_kwargs(&kwargs, MetricDomainType::Column).unwrap();

        assert_eq!(split.accessor, Kwargs::new().with("column", "a"));
        assert!(!split.compute.contains_key("column"));
        assert!(split.compute.contains_key("row_condition"));
    }

    #[test]
    fn test_table_split_keeps_everything_in_compute() {
        let kwargs = Kwargs::new().with("batch_id", "b1");
        let split = split_domain_kwargs(&kwargs, MetricDomainType::Table).unwrap();
        assert_eq!(split.compute, kwargs);
        assert!(split.accessor.is_empty());
    }

    #[test]
    fn test_multicolumn_accepts_columns_synonym() {
        let kwargs = Kwargs::new().with("columns", vec!["a", "b"]);
        let domain = Domain::from_kwargs(&kwargs, MetricDomainType::Multicolumn).unwrap();
        let split = domain.split();
        assert_eq!(split.accessor.get_str_list("columns").unwrap(), vec!["a", "b"]);
        assert_eq!(domain.accessor_columns(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_accessor_key_is_configuration_error() {
        let err = Domain::from_kwargs(&Kwargs::new(), MetricDomainType::ColumnPair).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("column_A"));
    }

    #[test]
    fn test_identity_projection() {
        let kwargs = Kwargs::new().with("column", "a").with("batch_id", "x");
        let domain = Domain::from_kwargs(&kwargs, MetricDomainType::Identity).unwrap();
        assert_eq!(domain.projection(), vec!["a"]);
        assert_eq!(domain.split().compute, kwargs);
    }

    #[test]
    fn test_add_column_null_filter_is_idempotent() {
        let kwargs = Kwargs::new();
        let once = add_column_null_filter(&kwargs, "a");
        let twice = add_column_null_filter(&once, "a");
        assert_eq!(once, twice);
        assert_eq!(
            twice.get_str_list(FILTER_CONDITIONS_KEY).unwrap(),
            vec!["col(\"a\").notnull()"]
        );
    }

    #[test]
    fn test_ignore_row_if_policies() {
        let pair = PairIgnoreRowIf::default();
        assert!(pair.skips(true, true));
        assert!(!pair.skips(true, false));
        assert!(PairIgnoreRowIf::EitherValueIsMissing.skips(true, false));

        let multi = MulticolumnIgnoreRowIf::default();
        assert!(multi.skips(&[true, true, true]));
        assert!(!multi.skips(&[true, false]));
        assert!(MulticolumnIgnoreRowIf::AnyValueIsMissing.skips(&[false, true]));

        let bad = Kwargs::new().with("ignore_row_if", "sometimes");
        assert!(PairIgnoreRowIf::from_kwargs(&bad).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_union_is_identity(
            column in "[a-z]{1,8}",
            extra in proptest::collection::btree_map("[a-z_]{1,8}", any::<i64>(), 0..5),
            domain_index in 0usize..3,
        ) {
            let mut kwargs = Kwargs::new();
            for (k, v) in &extra {
                kwargs.insert(format!("x_{k}"), *v);
            }
            let domain_type = [
                MetricDomainType::Table,
                MetricDomainType::Column,
                MetricDomainType::Identity,
            ][domain_index];
            kwargs.insert("column", column);

            let split = split_domain_kwargs(&kwargs, domain_type).unwrap();
            prop_assert_eq!(split.compute.merged(&split.accessor), kwargs.clone());
            prop_assert_eq!(
                split_domain_kwargs(&kwargs, domain_type).unwrap(),
                split
            );
        }
    }
}
