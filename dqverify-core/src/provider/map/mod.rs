//! Map metric providers.
//!
//! A map provider declares one condition per engine: for each row of the
//! domain, does the row satisfy the expectation. Registration derives the
//! rest of the family from that condition:
//!
//! | metric | value |
//! |---|---|
//! | `<name>.condition` | backend-native description of the unexpected rows |
//! | `<name>.unexpected_count` | number of unexpected rows |
//! | `<name>.unexpected_values` | offending values, truncated per result format |
//! | `<name>.unexpected_index_list` | row positions (table and dataframe engines) |
//! | `<name>.unexpected_value_counts` | value frequencies (column domains) |
//! | `<name>.unexpected_rows` | full offending rows, truncated |
//! | `<name>.unexpected_index_query` | query selecting the unexpected rows (SQL) |
//!
//! With `filter_column_isnull`, the condition of a column domain never sees
//! null values: a `col(..).notnull()` filter is appended to the compute kwargs
//! before the condition runs, and every member reads through those kwargs.

mod table;

#[cfg(feature = "sqlite")]
mod sql;

#[cfg(feature = "polars")]
mod frame;

use serde_json::Value;

use super::{RESULT_FORMAT_KEY, single_dependency};
use crate::domain::{COLUMN_KEY, MetricDomainType, add_column_null_filter};
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::registry::{MetricFn, MetricFnType, MetricRegistration, MetricRegistry};
use crate::Result;

#[cfg(feature = "polars")]
use polars::prelude::{DataType, Expr};

#[cfg(feature = "sqlite")]
use crate::engine::sql::{SqlSelectable, quote_identifier};

/// Member suffix of the condition metric.
pub const CONDITION: &str = "condition";
/// Member suffix of the unexpected row count.
pub const UNEXPECTED_COUNT: &str = "unexpected_count";
/// Member suffix of the unexpected values list.
pub const UNEXPECTED_VALUES: &str = "unexpected_values";
/// Member suffix of the unexpected row positions.
pub const UNEXPECTED_INDEX_LIST: &str = "unexpected_index_list";
/// Member suffix of the unexpected value frequencies.
pub const UNEXPECTED_VALUE_COUNTS: &str = "unexpected_value_counts";
/// Member suffix of the unexpected rows.
pub const UNEXPECTED_ROWS: &str = "unexpected_rows";
/// Member suffix of the unexpected rows query.
pub const UNEXPECTED_INDEX_QUERY: &str = "unexpected_index_query";
/// Suffix of bundled partials.
pub const AGGREGATE_FN: &str = "aggregate_fn";

/// Dependency name under which members receive the condition.
pub const UNEXPECTED_CONDITION: &str = "unexpected_condition";

/// Table engine condition: one flag per row, true when the row is expected.
///
/// Each row holds the accessor column values in declaration order.
pub type TableConditionFn = fn(&[Vec<&Value>], &Kwargs) -> Result<Vec<bool>>;

/// Inputs of a SQL condition.
#[cfg(feature = "sqlite")]
#[derive(Debug)]
pub struct SqlConditionInput<'a> {
    /// Accessor columns
    pub columns: &'a [String],
    /// Declared types of the accessor columns
    pub column_types: &'a [String],
    /// Storage classes held by accessor columns without a typed affinity
    pub storage_classes: &'a [Vec<String>],
    /// Metric value kwargs
    pub value_kwargs: &'a Kwargs,
    /// The compute domain the condition is evaluated on
    pub domain: &'a SqlSelectable,
}

#[cfg(feature = "sqlite")]
impl SqlConditionInput<'_> {
    /// Quoted name of the `i`-th accessor column.
    pub fn column(&self, i: usize) -> String {
        self.columns.get(i).map(|c| quote_identifier(c)).unwrap_or_default()
    }
}

/// SQL engine condition: a boolean expression true for expected rows.
#[cfg(feature = "sqlite")]
pub type SqlConditionFn = fn(&SqlConditionInput<'_>) -> Result<String>;

/// Inputs of a dataframe condition.
#[cfg(feature = "polars")]
#[derive(Debug)]
pub struct FrameConditionInput<'a> {
    /// Accessor columns
    pub columns: &'a [String],
    /// Data types of the accessor columns
    pub dtypes: &'a [DataType],
    /// Metric value kwargs
    pub value_kwargs: &'a Kwargs,
}

/// Dataframe engine condition: a boolean expression true for expected rows.
#[cfg(feature = "polars")]
pub type FrameConditionFn = fn(&FrameConditionInput<'_>) -> Result<Expr>;

/// Static description of a map metric.
#[derive(Debug)]
pub struct MapMetricProvider {
    /// Base name, e.g. `column_values.between`
    pub condition_metric_name: &'static str,
    /// Provider identity used for idempotent registration
    pub metric_class: &'static str,
    /// Domain the condition reads
    pub domain_type: MetricDomainType,
    /// Value keys the condition reads
    pub value_keys: &'static [&'static str],
    /// Exclude nulls in the accessor column before the condition runs
    pub filter_column_isnull: bool,
    /// The condition compares a row against the rest of the domain
    pub window: bool,
    /// Table engine condition
    pub table: Option<TableConditionFn>,
    /// SQL engine condition
    #[cfg(feature = "sqlite")]
    pub sql: Option<SqlConditionFn>,
    /// Dataframe engine condition
    #[cfg(feature = "polars")]
    pub frame: Option<FrameConditionFn>,
}

impl MapMetricProvider {
    /// Full name of a family member.
    pub fn metric_name(&self, suffix: &str) -> String {
        format!("{}.{}", self.condition_metric_name, suffix)
    }

    /// Engines this provider has a condition for.
    pub fn engines(&self) -> Vec<EngineType> {
        let mut engines = Vec::new();
        if self.table.is_some() {
            engines.push(EngineType::Table);
        }
        #[cfg(feature = "sqlite")]
        if self.sql.is_some() {
            engines.push(EngineType::Sql);
        }
        #[cfg(feature = "polars")]
        if self.frame.is_some() {
            engines.push(EngineType::Frame);
        }
        engines
    }

    /// Domain kwargs the condition is evaluated with.
    ///
    /// Column domains of null-filtering providers get a not-null filter on
    /// the accessor column.
    pub fn condition_domain_kwargs(&self, domain_kwargs: &Kwargs) -> Result<Kwargs> {
        if self.filter_column_isnull && self.domain_type == MetricDomainType::Column {
            let column = domain_kwargs.require_str(COLUMN_KEY)?;
            Ok(add_column_null_filter(domain_kwargs, column))
        } else {
            Ok(domain_kwargs.clone())
        }
    }

    /// Registers the whole family for every engine with a condition.
    pub fn register(&'static self, registry: &MetricRegistry) -> Result<()> {
        if let Some(condition) = self.table {
            table::register(self, condition, registry)?;
        }
        #[cfg(feature = "sqlite")]
        if let Some(condition) = self.sql {
            sql::register(self, condition, registry)?;
        }
        #[cfg(feature = "polars")]
        if let Some(condition) = self.frame {
            frame::register(self, condition, registry)?;
        }
        Ok(())
    }

    fn registration(&self, suffix: &str, fn_type: MetricFnType, provider: MetricFn) -> MetricRegistration {
        let mut value_keys: Vec<&str> = self.value_keys.to_vec();
        if !matches!(suffix, CONDITION | UNEXPECTED_COUNT) && !suffix.ends_with(AGGREGATE_FN) {
            value_keys.push(RESULT_FORMAT_KEY);
        }
        MetricRegistration::new(
            self.metric_name(suffix),
            format!("{}.{}", self.metric_class, suffix),
            fn_type,
            self.domain_type,
            provider,
        )
        .with_value_keys(&value_keys)
    }

    /// Registration of a member that reads the condition.
    fn member(&'static self, suffix: &str, fn_type: MetricFnType, provider: MetricFn) -> MetricRegistration {
        let condition = self.metric_name(CONDITION);
        self.registration(suffix, fn_type, provider)
            .with_dependencies(single_dependency(UNEXPECTED_CONDITION, move |configuration| {
                condition_configuration(&condition, configuration)
            }))
    }

    /// Registration of a final value computed from a bundled partial.
    #[cfg(any(feature = "sqlite", feature = "polars"))]
    fn from_partial(&'static self, suffix: &str, provider: MetricFn) -> MetricRegistration {
        let partial = self.metric_name(&format!("{}.{}", suffix, AGGREGATE_FN));
        self.registration(suffix, MetricFnType::Value, provider)
            .with_dependencies(single_dependency(super::METRIC_PARTIAL_FN, move |configuration| {
                configuration.renamed(partial.clone())
            }))
    }
}

/// The condition configuration a member depends on.
///
/// The result format only shapes member output, so it is dropped; members
/// with different formats share one condition.
pub fn condition_configuration(
    condition_metric_name: &str,
    member: &MetricConfiguration,
) -> MetricConfiguration {
    MetricConfiguration::new(
        condition_metric_name,
        member.metric_domain_kwargs.clone(),
        member.metric_value_kwargs.without(&[RESULT_FORMAT_KEY]),
    )
}

/// Finds a map provider by base name.
pub fn find_map_provider(condition_metric_name: &str) -> Option<&'static MapMetricProvider> {
    crate::metrics::map_providers()
        .find(|p| p.condition_metric_name == condition_metric_name)
}

/// Null-safe count read from an aggregate partial; aggregates over no rows
/// yield null.
pub(crate) fn count_from_partial(partial: &Value) -> Value {
    match partial {
        Value::Null => Value::from(0),
        Value::Number(n) => n
            .as_u64()
            .map(Value::from)
            .or_else(|| n.as_f64().map(|f| crate::metric_value::f64_to_json(f.round())))
            .unwrap_or(Value::from(0)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_configuration_drops_result_format() {
        let member = MetricConfiguration::new(
            "column_values.in_set.unexpected_values",
            Kwargs::new().with("column", "a"),
            Kwargs::new()
                .with("value_set", json!([1, 2]))
                .with("result_format", "COMPLETE"),
        );
        let condition = condition_configuration("column_values.in_set.condition", &member);
        assert_eq!(condition.metric_name, "column_values.in_set.condition");
        assert_eq!(
            condition.metric_value_kwargs,
            Kwargs::new().with("value_set", json!([1, 2]))
        );
    }

    #[test]
    fn test_null_filter_only_for_filtering_column_providers() {
        let between = find_map_provider("column_values.between").unwrap();
        let kwargs = between
            .condition_domain_kwargs(&Kwargs::new().with("column", "a"))
            .unwrap();
        assert_eq!(
            kwargs.get_array("filter_conditions"),
            Some(&vec![json!("col(\"a\").notnull()")])
        );

        let nonnull = find_map_provider("column_values.nonnull").unwrap();
        let kwargs = nonnull
            .condition_domain_kwargs(&Kwargs::new().with("column", "a"))
            .unwrap();
        assert!(!kwargs.contains_key("filter_conditions"));
    }

    #[test]
    fn test_count_from_partial() {
        assert_eq!(count_from_partial(&Value::Null), json!(0));
        assert_eq!(count_from_partial(&json!(3)), json!(3));
        assert_eq!(count_from_partial(&json!(3.0)), json!(3.0));
    }
}
