//! Map expectations.
//!
//! A map expectation judges each row of its domain through one map metric
//! and succeeds when at least `mostly` of the considered rows are expected.
//! Column expectations whose metric filters nulls consider the non-null rows
//! only; the null checks themselves, and pair and multicolumn expectations,
//! consider every row.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{
    Expectation, ExpectationOutcome, ResolvedMetrics, ValidatedConfiguration,
    ValidationDependencies, domain_kwargs, resolved, resolved_count, validate_common,
};
use crate::config::{ResultFormat, ResultFormatConfig};
use crate::domain::MetricDomainType;
use crate::engine::EngineType;
use crate::kwargs::Kwargs;
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::{compare_json, f64_to_json, sorted_value_counts, truncate};
use crate::metrics::column_json::{JSON_SCHEMA_KEY, compile_schema};
use crate::metrics::table::ROW_COUNT_METRIC;
use crate::provider::RESULT_FORMAT_KEY;
use crate::provider::map::{
    UNEXPECTED_COUNT, UNEXPECTED_INDEX_LIST, UNEXPECTED_INDEX_QUERY, UNEXPECTED_ROWS,
    UNEXPECTED_VALUE_COUNTS, UNEXPECTED_VALUES, find_map_provider,
};
use crate::{ExpectationsError, Result};

/// Null count of a column, used for the non-null denominator.
pub const NONNULL_UNEXPECTED_COUNT: &str = "column_values.nonnull.unexpected_count";

/// Relative and absolute tolerance of the `mostly` comparison.
const MOSTLY_TOLERANCE: f64 = 1e-9;

/// Extra kwargs check of one expectation type.
pub type KwargsCheck = fn(&Kwargs) -> Result<()>;

/// Static description of a map expectation.
#[derive(Debug)]
pub struct MapExpectationSpec {
    /// Expectation type name
    pub expectation_type: &'static str,
    /// Base name of the map metric family
    pub map_metric: &'static str,
    /// Domain of the map metric
    pub domain_type: MetricDomainType,
    /// Kwargs forwarded to the map metric as value kwargs
    pub value_keys: &'static [&'static str],
    /// Boolean kwargs defaulted to false
    pub false_defaults: &'static [&'static str],
    /// Success is judged over non-null rows
    pub nonnull_denominator: bool,
    /// Additional kwargs validation
    pub check: Option<KwargsCheck>,
}

/// Every built-in map expectation.
pub static MAP_EXPECTATIONS: &[MapExpectationSpec] = &[
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_not_be_null",
        map_metric: "column_values.nonnull",
        domain_type: MetricDomainType::Column,
        value_keys: &[],
        false_defaults: &[],
        nonnull_denominator: false,
        check: None,
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_be_null",
        map_metric: "column_values.null",
        domain_type: MetricDomainType::Column,
        value_keys: &[],
        false_defaults: &[],
        nonnull_denominator: false,
        check: None,
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_be_between",
        map_metric: "column_values.between",
        domain_type: MetricDomainType::Column,
        value_keys: &[
            "min_value",
            "max_value",
            "strict_min",
            "strict_max",
            "allow_cross_type_comparisons",
        ],
        false_defaults: &["strict_min", "strict_max"],
        nonnull_denominator: true,
        check: Some(check_bounds),
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_be_in_set",
        map_metric: "column_values.in_set",
        domain_type: MetricDomainType::Column,
        value_keys: &["value_set"],
        false_defaults: &[],
        nonnull_denominator: true,
        check: Some(check_value_set),
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_match_regex",
        map_metric: "column_values.match_regex",
        domain_type: MetricDomainType::Column,
        value_keys: &["regex"],
        false_defaults: &[],
        nonnull_denominator: true,
        check: Some(check_regex),
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_be_unique",
        map_metric: "column_values.unique",
        domain_type: MetricDomainType::Column,
        value_keys: &[],
        false_defaults: &[],
        nonnull_denominator: true,
        check: None,
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_be_json_parseable",
        map_metric: "column_values.json_parseable",
        domain_type: MetricDomainType::Column,
        value_keys: &[],
        false_defaults: &[],
        nonnull_denominator: true,
        check: None,
    },
    MapExpectationSpec {
        expectation_type: "expect_column_values_to_match_json_schema",
        map_metric: "column_values.match_json_schema",
        domain_type: MetricDomainType::Column,
        value_keys: &[JSON_SCHEMA_KEY],
        false_defaults: &[],
        nonnull_denominator: true,
        check: Some(check_json_schema),
    },
    MapExpectationSpec {
        expectation_type: "expect_column_pair_values_to_be_equal",
        map_metric: "column_pair_values.equal",
        domain_type: MetricDomainType::ColumnPair,
        value_keys: &[],
        false_defaults: &[],
        nonnull_denominator: false,
        check: None,
    },
    MapExpectationSpec {
        expectation_type: "expect_multicolumn_sum_to_equal",
        map_metric: "multicolumn_sum.equal",
        domain_type: MetricDomainType::Multicolumn,
        value_keys: &["sum_total"],
        false_defaults: &[],
        nonnull_denominator: false,
        check: Some(check_sum_total),
    },
];

/// Bounds shared by the between-style expectations.
pub(crate) fn check_bounds(kwargs: &Kwargs) -> Result<()> {
    let bound = |key: &str| kwargs.get(key).filter(|v| !v.is_null());
    match (bound("min_value"), bound("max_value")) {
        (None, None) => Err(ExpectationsError::configuration(
            "min_value and max_value cannot both be null",
        )),
        (Some(min), Some(max))
            if min.is_number() && max.is_number() && compare_json(min, max).is_gt() =>
        {
            Err(ExpectationsError::configuration(format!(
                "min_value {} cannot be greater than max_value {}",
                min, max
            )))
        }
        _ => Ok(()),
    }
}

fn check_value_set(kwargs: &Kwargs) -> Result<()> {
    kwargs
        .get_array("value_set")
        .map(|_| ())
        .ok_or_else(|| ExpectationsError::configuration("value_set must be a list"))
}

fn check_regex(kwargs: &Kwargs) -> Result<()> {
    let pattern = kwargs.require_str("regex")?;
    Regex::new(pattern).map(|_| ()).map_err(|e| {
        ExpectationsError::configuration(format!("invalid regex '{}': {}", pattern, e))
    })
}

fn check_json_schema(kwargs: &Kwargs) -> Result<()> {
    compile_schema(kwargs).map(|_| ())
}

fn check_sum_total(kwargs: &Kwargs) -> Result<()> {
    kwargs
        .get_f64("sum_total")
        .map(|_| ())
        .ok_or_else(|| ExpectationsError::configuration("sum_total must be a number"))
}

/// True when `(denominator - unexpected) / denominator` reaches `mostly`.
/// An empty denominator succeeds vacuously.
pub fn mostly_success(denominator: u64, unexpected: u64, mostly: f64) -> bool {
    if denominator == 0 {
        return true;
    }
    let ratio = denominator.saturating_sub(unexpected) as f64 / denominator as f64;
    let tolerance = MOSTLY_TOLERANCE.max(MOSTLY_TOLERANCE * mostly.abs());
    ratio >= mostly || (ratio - mostly).abs() <= tolerance
}

impl MapExpectationSpec {
    fn member(&self, suffix: &str) -> String {
        format!("{}.{}", self.map_metric, suffix)
    }

    /// Non-null rows are the denominator; only meaningful for columns.
    fn uses_nonnull_count(&self) -> bool {
        self.nonnull_denominator && self.domain_type == MetricDomainType::Column
    }
}

impl Expectation for MapExpectationSpec {
    fn expectation_type(&self) -> &'static str {
        self.expectation_type
    }

    fn domain_type(&self) -> MetricDomainType {
        self.domain_type
    }

    fn default_kwargs(&self) -> Kwargs {
        self.false_defaults
            .iter()
            .fold(Kwargs::new().with(super::MOSTLY_KEY, 1.0), |kwargs, key| {
                kwargs.with(*key, false)
            })
    }

    fn validate_configuration(&self, kwargs: &Kwargs) -> Result<()> {
        validate_common(self.domain_type, kwargs)?;
        if find_map_provider(self.map_metric).is_none() {
            return Err(ExpectationsError::configuration(format!(
                "no map metric named {}",
                self.map_metric
            )));
        }
        match self.check {
            Some(check) => check(kwargs),
            None => Ok(()),
        }
    }

    fn get_validation_dependencies(
        &self,
        configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        engine: EngineType,
    ) -> Result<ValidationDependencies> {
        let kwargs = configuration.kwargs();
        let domain = domain_kwargs(kwargs, self.domain_type);
        let values = kwargs.subset(self.value_keys);

        let mut dependencies = ValidationDependencies::new();
        dependencies.insert(
            ROW_COUNT_METRIC.to_string(),
            MetricConfiguration::new(
                ROW_COUNT_METRIC,
                domain_kwargs(&domain, MetricDomainType::Table),
                Kwargs::new(),
            ),
        );
        if self.uses_nonnull_count() {
            dependencies.insert(
                NONNULL_UNEXPECTED_COUNT.to_string(),
                MetricConfiguration::new(NONNULL_UNEXPECTED_COUNT, domain.clone(), Kwargs::new()),
            );
        }
        let mut add = |suffix: &str, value_kwargs: &Kwargs| {
            let name = self.member(suffix);
            dependencies.insert(
                name.clone(),
                MetricConfiguration::new(name, domain.clone(), value_kwargs.clone()),
            );
        };
        add(UNEXPECTED_COUNT, &values);

        if result_format.result_format == ResultFormat::BooleanOnly {
            return Ok(dependencies);
        }
        let shaped = values.clone().with(RESULT_FORMAT_KEY, result_format.to_value());
        add(UNEXPECTED_VALUES, &shaped);
        if result_format.include_unexpected_rows {
            add(UNEXPECTED_ROWS, &shaped);
        }
        if matches!(
            result_format.result_format,
            ResultFormat::Summary | ResultFormat::Complete
        ) {
            if engine.supports_row_index() || result_format.unexpected_index_column_names.is_some()
            {
                add(UNEXPECTED_INDEX_LIST, &shaped);
            }
            if self.domain_type == MetricDomainType::Column {
                add(UNEXPECTED_VALUE_COUNTS, &shaped);
            }
        }
        if engine == EngineType::Sql && result_format.return_unexpected_index_query {
            add(UNEXPECTED_INDEX_QUERY, &shaped);
        }
        Ok(dependencies)
    }

    fn validate(
        &self,
        configuration: &ValidatedConfiguration,
        result_format: &ResultFormatConfig,
        metrics: &ResolvedMetrics,
        _engine: EngineType,
    ) -> Result<ExpectationOutcome> {
        let element_count = resolved_count(metrics, ROW_COUNT_METRIC)?;
        let unexpected_count = resolved_count(metrics, &self.member(UNEXPECTED_COUNT))?;
        let nonnull_count = if self.uses_nonnull_count() {
            Some(element_count.saturating_sub(resolved_count(metrics, NONNULL_UNEXPECTED_COUNT)?))
        } else {
            None
        };

        let success = mostly_success(
            nonnull_count.unwrap_or(element_count),
            unexpected_count,
            configuration.mostly(),
        );

        let member = |suffix: &str| metrics.get(&self.member(suffix));
        let values = if result_format.result_format == ResultFormat::BooleanOnly {
            Vec::new()
        } else {
            match resolved(metrics, &self.member(UNEXPECTED_VALUES))? {
                Value::Array(values) => values.clone(),
                other => {
                    return Err(ExpectationsError::invalid_result(
                        self.member(UNEXPECTED_VALUES),
                        other,
                    ));
                }
            }
        };
        let result = format_map_output(
            result_format,
            &MapCounts {
                element_count,
                nonnull_count,
                unexpected_count,
            },
            &MapMembers {
                unexpected_values: values,
                unexpected_index_list: member(UNEXPECTED_INDEX_LIST).cloned(),
                unexpected_value_counts: member(UNEXPECTED_VALUE_COUNTS).cloned(),
                unexpected_rows: member(UNEXPECTED_ROWS).cloned(),
                unexpected_index_query: member(UNEXPECTED_INDEX_QUERY).cloned(),
            },
        );
        Ok(ExpectationOutcome { success, result })
    }
}

/// Row counts a map result is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapCounts {
    /// Rows in the domain
    pub element_count: u64,
    /// Non-null rows, when the expectation judges those only
    pub nonnull_count: Option<u64>,
    /// Rows failing the condition
    pub unexpected_count: u64,
}

/// Resolved unexpected-* members a map result is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapMembers {
    /// Offending values, truncated unless COMPLETE
    pub unexpected_values: Vec<Value>,
    /// Row positions or index column mappings
    pub unexpected_index_list: Option<Value>,
    /// `[{value, count}]` over every unexpected row
    pub unexpected_value_counts: Option<Value>,
    /// Full offending rows
    pub unexpected_rows: Option<Value>,
    /// Query selecting the offending rows
    pub unexpected_index_query: Option<Value>,
}

fn percent(part: u64, whole: u64) -> Value {
    f64_to_json(part as f64 / whole as f64 * 100.0)
}

/// Builds the result payload of a map expectation.
pub fn format_map_output(
    result_format: &ResultFormatConfig,
    counts: &MapCounts,
    members: &MapMembers,
) -> Map<String, Value> {
    let mut result = Map::new();
    if result_format.result_format == ResultFormat::BooleanOnly {
        return result;
    }

    let MapCounts {
        element_count,
        nonnull_count,
        unexpected_count,
    } = *counts;
    let missing_count = nonnull_count.map(|nonnull| element_count.saturating_sub(nonnull));

    let (unexpected_percent_total, unexpected_percent_nonmissing, missing_percent) =
        if element_count == 0 {
            (Value::Null, Value::Null, Value::Null)
        } else {
            let total = percent(unexpected_count, element_count);
            match (nonnull_count, missing_count) {
                (Some(nonnull), Some(missing)) => (
                    total,
                    if nonnull > 0 {
                        percent(unexpected_count, nonnull)
                    } else {
                        Value::Null
                    },
                    percent(missing, element_count),
                ),
                _ => (total.clone(), total, Value::Null),
            }
        };

    let partial_count = result_format.partial_unexpected_count;
    let partial_list = truncate(members.unexpected_values.clone(), Some(partial_count));
    let include_values = !result_format.exclude_unexpected_values;

    result.insert("element_count".into(), element_count.into());
    result.insert("unexpected_count".into(), unexpected_count.into());
    result.insert(
        "unexpected_percent".into(),
        unexpected_percent_nonmissing.clone(),
    );
    if include_values {
        result.insert(
            "partial_unexpected_list".into(),
            Value::Array(partial_list.clone()),
        );
    }
    if let Some(missing_count) = missing_count {
        result.insert("missing_count".into(), missing_count.into());
        result.insert("missing_percent".into(), missing_percent);
        result.insert("unexpected_percent_total".into(), unexpected_percent_total);
        result.insert(
            "unexpected_percent_nonmissing".into(),
            unexpected_percent_nonmissing,
        );
    }
    if result_format.include_unexpected_rows {
        if let Some(rows) = &members.unexpected_rows {
            result.insert("unexpected_rows".into(), rows.clone());
        }
    }
    if result_format.result_format == ResultFormat::Basic {
        return result;
    }

    if let Some(Value::Array(index_list)) = &members.unexpected_index_list {
        result.insert(
            "partial_unexpected_index_list".into(),
            Value::Array(truncate(index_list.clone(), Some(partial_count))),
        );
    }
    if include_values {
        let value_counts = match &members.unexpected_value_counts {
            Some(counts) => counts.clone(),
            None => count_values(&partial_list, partial_count),
        };
        result.insert("partial_unexpected_counts".into(), value_counts);
    }
    if result_format.result_format == ResultFormat::Summary {
        return result;
    }

    if include_values {
        result.insert(
            "unexpected_list".into(),
            Value::Array(members.unexpected_values.clone()),
        );
    }
    if let Some(index_list) = &members.unexpected_index_list {
        result.insert("unexpected_index_list".into(), index_list.clone());
    }
    if let Some(query) = &members.unexpected_index_query {
        result.insert("unexpected_index_query".into(), query.clone());
    }
    result
}

/// Value frequencies of a reported list, for domains without a
/// value-counts metric.
fn count_values(values: &[Value], limit: usize) -> Value {
    let mut counts: HashMap<String, (Value, u64)> = HashMap::new();
    for value in values {
        counts
            .entry(value.to_string())
            .or_insert_with(|| (value.clone(), 0))
            .1 += 1;
    }
    sorted_value_counts(counts.into_values().collect(), Some(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::ExpectationConfiguration;
    use proptest::prelude::*;
    use serde_json::json;

    fn format(level: ResultFormat) -> ResultFormatConfig {
        ResultFormatConfig::new().with_result_format(level)
    }

    fn spec(expectation_type: &str) -> &'static MapExpectationSpec {
        MAP_EXPECTATIONS
            .iter()
            .find(|s| s.expectation_type == expectation_type)
            .unwrap()
    }

    fn validated(expectation_type: &str, kwargs: Kwargs) -> ValidatedConfiguration {
        ExpectationConfiguration::new(expectation_type, kwargs)
            .validate()
            .unwrap()
    }

    // ========================================================================
    // mostly
    // ========================================================================

    #[test]
    fn test_mostly_success() {
        assert!(mostly_success(0, 0, 1.0));
        assert!(mostly_success(5, 2, 0.6));
        assert!(!mostly_success(5, 2, 0.7));
        assert!(mostly_success(10, 3, 0.7));
        assert!(!mostly_success(10, 1, 1.0));
    }

    proptest! {
        /// Success is monotone in `mostly` and vacuous on empty domains.
        #[test]
        fn prop_mostly_law(total in 0u64..500, unexpected in 0u64..500, mostly in 0.0f64..=1.0) {
            let unexpected = unexpected.min(total);
            if total == 0 {
                prop_assert!(mostly_success(total, unexpected, mostly));
            } else {
                let ratio = (total - unexpected) as f64 / total as f64;
                if ratio >= mostly {
                    prop_assert!(mostly_success(total, unexpected, mostly));
                }
                if mostly_success(total, unexpected, mostly) {
                    prop_assert!(mostly_success(total, unexpected, mostly / 2.0));
                }
            }
            prop_assert!(mostly_success(total, 0, mostly));
        }

        /// Every key of a lower result format appears in every higher one.
        #[test]
        fn prop_result_format_monotonic(
            element_count in 0u64..50,
            unexpected in 0u64..50,
            missing in proptest::option::of(0u64..50),
        ) {
            let unexpected = unexpected.min(element_count);
            let counts = MapCounts {
                element_count,
                nonnull_count: missing.map(|m| element_count.saturating_sub(m)),
                unexpected_count: unexpected,
            };
            let members = MapMembers {
                unexpected_values: (0..unexpected).map(Value::from).collect(),
                unexpected_index_list: Some(Value::Array((0..unexpected).map(Value::from).collect())),
                ..MapMembers::default()
            };
            let levels = [
                ResultFormat::BooleanOnly,
                ResultFormat::Basic,
                ResultFormat::Summary,
                ResultFormat::Complete,
            ];
            for pair in levels.windows(2) {
                let lower = format_map_output(&format(pair[0]), &counts, &members);
                let higher = format_map_output(&format(pair[1]), &counts, &members);
                for key in lower.keys() {
                    prop_assert!(higher.contains_key(key), "{} missing at {:?}", key, pair[1]);
                }
            }
        }
    }

    // ========================================================================
    // format_map_output
    // ========================================================================

    #[test]
    fn test_basic_with_nonnull_count() {
        let counts = MapCounts {
            element_count: 10,
            nonnull_count: Some(8),
            unexpected_count: 2,
        };
        let members = MapMembers {
            unexpected_values: vec![json!(7), json!(9)],
            ..MapMembers::default()
        };
        let result = format_map_output(&format(ResultFormat::Basic), &counts, &members);
        assert_eq!(result["element_count"], json!(10));
        assert_eq!(result["missing_count"], json!(2));
        assert_eq!(result["missing_percent"], json!(20.0));
        assert_eq!(result["unexpected_percent"], json!(25.0));
        assert_eq!(result["unexpected_percent_total"], json!(20.0));
        assert_eq!(result["partial_unexpected_list"], json!([7, 9]));
        assert!(!result.contains_key("partial_unexpected_counts"));
    }

    #[test]
    fn test_truncation_and_exclusion() {
        let counts = MapCounts {
            element_count: 30,
            nonnull_count: None,
            unexpected_count: 25,
        };
        let members = MapMembers {
            unexpected_values: (0..25).map(Value::from).collect(),
            ..MapMembers::default()
        };
        let complete = format_map_output(&format(ResultFormat::Complete), &counts, &members);
        assert_eq!(complete["partial_unexpected_list"].as_array().unwrap().len(), 20);
        assert_eq!(complete["unexpected_list"].as_array().unwrap().len(), 25);
        assert!(!complete.contains_key("missing_count"));
        assert_eq!(complete["partial_unexpected_counts"].as_array().unwrap().len(), 20);

        let excluded = format_map_output(
            &format(ResultFormat::Complete).with_exclude_unexpected_values(true),
            &counts,
            &members,
        );
        assert!(!excluded.contains_key("partial_unexpected_list"));
        assert!(!excluded.contains_key("unexpected_list"));
        assert_eq!(excluded["unexpected_count"], json!(25));
    }

    #[test]
    fn test_empty_domain_percents_are_null() {
        let counts = MapCounts {
            element_count: 0,
            nonnull_count: Some(0),
            unexpected_count: 0,
        };
        let result = format_map_output(&format(ResultFormat::Basic), &counts, &MapMembers::default());
        assert_eq!(result["unexpected_percent"], Value::Null);
        assert_eq!(result["missing_percent"], Value::Null);
        assert!(format_map_output(&format(ResultFormat::BooleanOnly), &counts, &MapMembers::default()).is_empty());
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    #[test]
    fn test_dependencies_follow_result_format() {
        let between = spec("expect_column_values_to_be_between");
        let configuration = validated(
            "expect_column_values_to_be_between",
            Kwargs::new()
                .with("column", "a")
                .with("min_value", 0)
                .with("mostly", 0.9),
        );

        let boolean = between
            .get_validation_dependencies(&configuration, &format(ResultFormat::BooleanOnly), EngineType::Table)
            .unwrap();
        assert_eq!(
            boolean.keys().cloned().collect::<Vec<_>>(),
            vec![
                "column_values.between.unexpected_count".to_string(),
                NONNULL_UNEXPECTED_COUNT.to_string(),
                ROW_COUNT_METRIC.to_string(),
            ]
        );
        let unexpected_count = &boolean["column_values.between.unexpected_count"];
        assert!(!unexpected_count.metric_value_kwargs.contains_key("mostly"));
        assert_eq!(
            boolean[ROW_COUNT_METRIC].metric_domain_kwargs,
            Kwargs::new()
        );

        let summary_sql = between
            .get_validation_dependencies(&configuration, &format(ResultFormat::Summary), EngineType::Sql)
            .unwrap();
        assert!(summary_sql.contains_key("column_values.between.unexpected_value_counts"));
        assert!(!summary_sql.contains_key("column_values.between.unexpected_index_list"));

        let summary_frame = between
            .get_validation_dependencies(&configuration, &format(ResultFormat::Summary), EngineType::Frame)
            .unwrap();
        assert!(summary_frame.contains_key("column_values.between.unexpected_index_list"));
    }

    #[test]
    fn test_null_checks_use_total_denominator() {
        let not_null = spec("expect_column_values_to_not_be_null");
        let configuration = validated(
            "expect_column_values_to_not_be_null",
            Kwargs::new().with("column", "a").with("mostly", 0.6),
        );
        let metrics: ResolvedMetrics = [
            (ROW_COUNT_METRIC.to_string(), json!(5)),
            ("column_values.nonnull.unexpected_count".to_string(), json!(2)),
            ("column_values.nonnull.unexpected_values".to_string(), json!([null, null])),
        ]
        .into_iter()
        .collect();
        let outcome = not_null
            .validate(&configuration, &format(ResultFormat::Basic), &metrics, EngineType::Table)
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result["unexpected_percent"], json!(40.0));
        assert!(!outcome.result.contains_key("missing_count"));
    }

    #[test]
    fn test_configuration_checks() {
        let between = ExpectationConfiguration::new(
            "expect_column_values_to_be_between",
            Kwargs::new().with("column", "a").with("min_value", 5).with("max_value", 1),
        );
        assert!(between.validate().is_err());

        let regex = ExpectationConfiguration::new(
            "expect_column_values_to_match_regex",
            Kwargs::new().with("column", "a").with("regex", "["),
        );
        assert!(regex.validate().is_err());

        let sum = ExpectationConfiguration::new(
            "expect_multicolumn_sum_to_equal",
            Kwargs::new().with("column_list", json!(["a", "b"])),
        );
        assert!(sum.validate().is_err());

        let schema = ExpectationConfiguration::new(
            "expect_column_values_to_match_json_schema",
            Kwargs::new().with("column", "a").with("json_schema", json!({"type": 5})),
        );
        assert!(matches!(
            schema.validate().unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));
        let missing_schema = ExpectationConfiguration::new(
            "expect_column_values_to_match_json_schema",
            Kwargs::new().with("column", "a"),
        );
        assert!(missing_schema.validate().is_err());
        let valid = ExpectationConfiguration::new(
            "expect_column_values_to_match_json_schema",
            Kwargs::new().with("column", "a").with("json_schema", json!({"type": "object"})),
        );
        assert!(valid.validate().is_ok());
    }
}
