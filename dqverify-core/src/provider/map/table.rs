//! Map family on the in-memory table engine.
//!
//! The condition resolves to the positions of the unexpected rows; members
//! read values straight out of the batch at those positions.

use serde_json::Value;
use std::collections::HashMap;

use super::{
    CONDITION, MapMetricProvider, TableConditionFn, UNEXPECTED_CONDITION, UNEXPECTED_COUNT,
    UNEXPECTED_INDEX_LIST, UNEXPECTED_ROWS, UNEXPECTED_VALUE_COUNTS, UNEXPECTED_VALUES,
};
use crate::config::ResultFormatConfig;
use crate::domain::MetricDomainType;
use crate::engine::MetricCall;
use crate::engine::table::TableExecutionEngine;
use crate::metric_value::{
    MetricValue, RowIndexCondition, UnexpectedCondition, sorted_value_counts, truncate,
};
use crate::provider::{accessor_columns, result_limit, shape_values, unexpected_dependency};
use crate::registry::{MetricFn, MetricFnType, MetricRegistry};
use crate::{ExpectationsError, Result};

pub(super) fn register(
    provider: &'static MapMetricProvider,
    condition: TableConditionFn,
    registry: &MetricRegistry,
) -> Result<()> {
    let fn_type = if provider.window {
        MetricFnType::WindowConditionFn
    } else {
        MetricFnType::MapCondition
    };
    registry.register_metric(provider.registration(
        CONDITION,
        fn_type,
        MetricFn::table(move |call| unexpected_condition(provider, condition, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_COUNT,
        MetricFnType::Value,
        MetricFn::table(|call| Ok(MetricValue::json(dependency(call)?.condition.len()))),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_VALUES,
        MetricFnType::Value,
        MetricFn::table(move |call| unexpected_values(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_INDEX_LIST,
        MetricFnType::Value,
        MetricFn::table(move |call| unexpected_index_list(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_ROWS,
        MetricFnType::Value,
        MetricFn::table(unexpected_rows),
    ))?;
    if provider.domain_type == MetricDomainType::Column {
        registry.register_metric(provider.member(
            UNEXPECTED_VALUE_COUNTS,
            MetricFnType::Value,
            MetricFn::table(unexpected_value_counts),
        ))?;
    }
    Ok(())
}

fn unexpected_condition(
    provider: &MapMetricProvider,
    condition: TableConditionFn,
    call: &MetricCall<'_, TableExecutionEngine>,
) -> Result<MetricValue> {
    let domain_kwargs = provider.condition_domain_kwargs(call.domain_kwargs())?;
    let domain = call
        .engine
        .get_compute_domain(&domain_kwargs, provider.domain_type)?;
    let columns = accessor_columns(&domain.accessor_kwargs, provider.domain_type)?;

    let (rows, values): (Vec<usize>, Vec<Vec<&Value>>) =
        domain.handle.columns_by_row(&columns)?.into_iter().unzip();
    let expected = condition(&values, call.value_kwargs())?;
    if expected.len() != rows.len() {
        return Err(ExpectationsError::provider_message(
            call.metric_name(),
            format!("condition returned {} flags for {} rows", expected.len(), rows.len()),
        ));
    }

    let unexpected = rows
        .into_iter()
        .zip(expected)
        .filter_map(|(row, ok)| (!ok).then_some(row))
        .collect();
    Ok(MetricValue::RowIndex(UnexpectedCondition {
        condition: unexpected,
        compute_kwargs: domain.compute_kwargs,
        accessor_kwargs: domain.accessor_kwargs,
    }))
}

fn dependency<'c>(
    call: &'c MetricCall<'_, TableExecutionEngine>,
) -> Result<&'c RowIndexCondition> {
    match call.dependency(UNEXPECTED_CONDITION)? {
        MetricValue::RowIndex(condition) => Ok(condition),
        _ => Err(unexpected_dependency(call.metric_name(), UNEXPECTED_CONDITION)),
    }
}

fn unexpected_values(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, TableExecutionEngine>,
) -> Result<MetricValue> {
    let condition = dependency(call)?;
    let data = call.engine.resolve_batch(&condition.compute_kwargs)?;
    let columns = accessor_columns(&condition.accessor_kwargs, provider.domain_type)?;
    let indices = data.column_indices(&columns)?;

    let rows = truncate(condition.condition.clone(), result_limit(call.value_kwargs())?);
    let values = rows
        .into_iter()
        .map(|row| {
            let row_values = indices.iter().map(|i| data.value(row, *i).clone()).collect();
            shape_values(provider.domain_type, &columns, row_values)
        })
        .collect();
    Ok(MetricValue::json(Value::Array(values)))
}

/// Positions of the unexpected rows, or mappings of the requested index
/// columns (plus the accessor columns) when `unexpected_index_column_names`
/// is set.
fn unexpected_index_list(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, TableExecutionEngine>,
) -> Result<MetricValue> {
    let condition = dependency(call)?;
    let format = ResultFormatConfig::from_value_kwargs(call.value_kwargs())?;
    let rows = truncate(condition.condition.clone(), format.limit());

    let Some(names) = &format.unexpected_index_column_names else {
        return Ok(MetricValue::json(Value::Array(
            rows.into_iter().map(Value::from).collect(),
        )));
    };

    let mut columns = names.clone();
    for column in accessor_columns(&condition.accessor_kwargs, provider.domain_type)? {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    let data = call.engine.resolve_batch(&condition.compute_kwargs)?;
    let indices = data.column_indices(&columns)?;
    let entries = rows
        .into_iter()
        .map(|row| {
            Value::Object(
                columns
                    .iter()
                    .cloned()
                    .zip(indices.iter().map(|i| data.value(row, *i).clone()))
                    .collect(),
            )
        })
        .collect();
    Ok(MetricValue::json(Value::Array(entries)))
}

fn unexpected_rows(call: &MetricCall<'_, TableExecutionEngine>) -> Result<MetricValue> {
    let condition = dependency(call)?;
    let data = call.engine.resolve_batch(&condition.compute_kwargs)?;
    let rows = truncate(condition.condition.clone(), result_limit(call.value_kwargs())?);
    Ok(MetricValue::json(Value::Array(
        rows.into_iter()
            .map(|row| Value::Object(data.record(row)))
            .collect(),
    )))
}

fn unexpected_value_counts(call: &MetricCall<'_, TableExecutionEngine>) -> Result<MetricValue> {
    let condition = dependency(call)?;
    let data = call.engine.resolve_batch(&condition.compute_kwargs)?;
    let columns = accessor_columns(&condition.accessor_kwargs, MetricDomainType::Column)?;
    let index = data.column_indices(&columns)?.first().copied().unwrap_or_default();

    let mut counts: HashMap<String, (Value, u64)> = HashMap::new();
    for row in &condition.condition {
        let value = data.value(*row, index);
        counts
            .entry(value.to_string())
            .or_insert_with(|| (value.clone(), 0))
            .1 += 1;
    }
    Ok(MetricValue::json(sorted_value_counts(
        counts.into_values().collect(),
        result_limit(call.value_kwargs())?,
    )))
}
