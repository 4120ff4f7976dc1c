//! Multicolumn map metrics.

use serde_json::Value;

use crate::domain::MetricDomainType;
use crate::kwargs::Kwargs;
use crate::metric_value::is_missing;
use crate::provider::map::MapMetricProvider;
use crate::{ExpectationsError, Result};

#[cfg(feature = "polars")]
use crate::provider::map::FrameConditionInput;
#[cfg(feature = "sqlite")]
use crate::provider::map::SqlConditionInput;
#[cfg(feature = "polars")]
use polars::prelude::{DataType, Expr, col, lit};

/// Rows whose column values sum to `sum_total`; missing values count as 0.
pub static SUM_EQUAL: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "multicolumn_sum.equal",
    metric_class: "MulticolumnSumEqual",
    domain_type: MetricDomainType::Multicolumn,
    value_keys: &["sum_total"],
    filter_column_isnull: false,
    window: false,
    table: Some(sum_equal_table),
    #[cfg(feature = "sqlite")]
    sql: Some(sum_equal_sql),
    #[cfg(feature = "polars")]
    frame: Some(sum_equal_frame),
};

/// Tolerance for float sums.
const SUM_EPSILON: f64 = 1e-9;

fn sum_total(kwargs: &Kwargs) -> Result<f64> {
    kwargs
        .get_f64("sum_total")
        .ok_or_else(|| ExpectationsError::configuration("sum_total must be a number"))
}

fn sum_equal_table(rows: &[Vec<&Value>], kwargs: &Kwargs) -> Result<Vec<bool>> {
    let total = sum_total(kwargs)?;
    rows.iter()
        .map(|row| {
            let mut sum = 0.0;
            for value in row {
                if is_missing(value) {
                    continue;
                }
                sum += value.as_f64().ok_or_else(|| {
                    ExpectationsError::provider_message(
                        SUM_EQUAL.condition_metric_name,
                        format!("cannot sum non-numeric value {}", value),
                    )
                })?;
            }
            Ok((sum - total).abs() <= SUM_EPSILON)
        })
        .collect()
}

#[cfg(feature = "sqlite")]
fn sum_equal_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    let total = sum_total(input.value_kwargs)?;
    let terms: Vec<String> = (0..input.columns.len())
        .map(|i| format!("COALESCE({}, 0)", input.column(i)))
        .collect();
    if terms.is_empty() {
        return Err(ExpectationsError::configuration("column_list must not be empty"));
    }
    Ok(format!("ABS(({}) - {}) <= {}", terms.join(" + "), total, SUM_EPSILON))
}

#[cfg(feature = "polars")]
fn sum_equal_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    let total = sum_total(input.value_kwargs)?;
    let sum = input
        .columns
        .iter()
        .map(|c| col(c).cast(DataType::Float64).fill_null(lit(0.0)))
        .reduce(|acc, e| acc + e)
        .ok_or_else(|| ExpectationsError::configuration("column_list must not be empty"))?;
    Ok((sum - lit(total)).abs().lt_eq(lit(SUM_EPSILON)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sum_equal_treats_missing_as_zero() {
        let values = [
            vec![json!(1), json!(2)],
            vec![json!(3), json!(null)],
            vec![json!(0.5), json!(2.5)],
        ];
        let rows: Vec<Vec<&Value>> = values.iter().map(|r| r.iter().collect()).collect();
        let kwargs = Kwargs::new().with("sum_total", 3);
        assert_eq!(
            sum_equal_table(&rows, &kwargs).unwrap(),
            vec![true, true, true]
        );
    }

    #[test]
    fn test_sum_equal_rejects_strings_and_missing_total() {
        let values = [vec![json!("a"), json!(1)]];
        let rows: Vec<Vec<&Value>> = values.iter().map(|r| r.iter().collect()).collect();
        assert!(sum_equal_table(&rows, &Kwargs::new().with("sum_total", 1)).is_err());
        assert!(matches!(
            sum_equal_table(&rows, &Kwargs::new()).unwrap_err(),
            ExpectationsError::Configuration { .. }
        ));
    }
}
