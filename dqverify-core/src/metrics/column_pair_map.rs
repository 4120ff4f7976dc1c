//! Column pair map metrics.
//!
//! Rows skipped by `ignore_row_if` are removed by the compute domain before
//! the condition runs.

use serde_json::Value;

use crate::Result;
use crate::domain::MetricDomainType;
use crate::kwargs::Kwargs;
use crate::metric_value::{compare_json, is_missing};
use crate::provider::map::MapMetricProvider;

#[cfg(feature = "polars")]
use crate::provider::map::FrameConditionInput;
#[cfg(feature = "sqlite")]
use crate::provider::map::SqlConditionInput;
#[cfg(feature = "polars")]
use polars::prelude::{Expr, col};

/// Rows whose two values are equal.
pub static EQUAL: MapMetricProvider = MapMetricProvider {
    condition_metric_name: "column_pair_values.equal",
    metric_class: "ColumnPairValuesEqual",
    domain_type: MetricDomainType::ColumnPair,
    value_keys: &[],
    filter_column_isnull: false,
    window: false,
    table: Some(equal_table),
    #[cfg(feature = "sqlite")]
    sql: Some(equal_sql),
    #[cfg(feature = "polars")]
    frame: Some(equal_frame),
};

/// A remaining missing value never equals anything.
fn equal_table(rows: &[Vec<&Value>], _: &Kwargs) -> Result<Vec<bool>> {
    Ok(rows
        .iter()
        .map(|row| match row.as_slice() {
            [a, b] if !is_missing(a) && !is_missing(b) => compare_json(a, b).is_eq(),
            _ => false,
        })
        .collect())
}

#[cfg(feature = "sqlite")]
fn equal_sql(input: &SqlConditionInput<'_>) -> Result<String> {
    Ok(format!("{} = {}", input.column(0), input.column(1)))
}

#[cfg(feature = "polars")]
fn equal_frame(input: &FrameConditionInput<'_>) -> Result<Expr> {
    match input.columns {
        [a, b] => Ok(col(a).eq(col(b))),
        _ => Err(crate::ExpectationsError::configuration(
            "column pair condition requires column_A and column_B",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_table() {
        let values = [
            (json!(1), json!(1.0)),
            (json!("x"), json!("y")),
            (json!(null), json!(null)),
            (json!(2), json!(null)),
        ];
        let rows: Vec<Vec<&Value>> = values.iter().map(|(a, b)| vec![a, b]).collect();
        assert_eq!(
            equal_table(&rows, &Kwargs::new()).unwrap(),
            vec![true, false, false, false]
        );
    }
}
