//! Map family on the dataframe engine.
//!
//! The condition resolves to an expression true for unexpected rows. Unlike
//! the SQL family the domain filter is not folded in: members rebuild the
//! compute domain and evaluate the expression over its rows, so window
//! conditions only ever see rows of the domain.

use polars::prelude::*;
use serde_json::Value;

use super::{
    AGGREGATE_FN, CONDITION, FrameConditionFn, FrameConditionInput, MapMetricProvider,
    UNEXPECTED_CONDITION, UNEXPECTED_COUNT, UNEXPECTED_INDEX_LIST, UNEXPECTED_ROWS,
    UNEXPECTED_VALUE_COUNTS, UNEXPECTED_VALUES, count_from_partial,
};
use crate::Result;
use crate::config::ResultFormatConfig;
use crate::domain::MetricDomainType;
use crate::engine::MetricCall;
use crate::engine::frame::{
    FrameDomain, FrameExecutionEngine, FrameMetricOutcome, ROW_INDEX_COLUMN, frame_rows,
    frame_to_records, series_to_json,
};
use crate::metric_value::{FrameCondition, MetricValue, UnexpectedCondition, sorted_value_counts};
use crate::provider::{
    METRIC_PARTIAL_FN, accessor_columns, result_limit, shape_values, unexpected_dependency,
};
use crate::registry::{MetricFn, MetricFnType, MetricRegistry};

const COUNT_COLUMN: &str = "__count";

pub(super) fn register(
    provider: &'static MapMetricProvider,
    condition: FrameConditionFn,
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
        MetricFn::frame(move |call| unexpected_condition(provider, condition, call)),
    ))?;

    if provider.window {
        // Window expressions cannot share a select with plain aggregates.
        registry.register_metric(provider.member(
            UNEXPECTED_COUNT,
            MetricFnType::Data,
            MetricFn::frame(move |call| unexpected_count(provider, call)),
        ))?;
    } else {
        registry.register_metric(provider.member(
            &format!("{}.{}", UNEXPECTED_COUNT, AGGREGATE_FN),
            MetricFnType::AggregateFn,
            MetricFn::frame(move |call| {
                let condition = dependency(call)?;
                let domain = condition_domain(provider, call, condition)?;
                Ok(FrameMetricOutcome::Aggregate {
                    expression: domain
                        .restrict(condition.condition.clone())
                        .fill_null(lit(false))
                        .cast(DataType::UInt32)
                        .sum(),
                    domain_kwargs: condition.compute_kwargs.clone(),
                })
            }),
        ))?;
        registry.register_metric(provider.from_partial(
            UNEXPECTED_COUNT,
            MetricFn::frame(|call| {
                let partial = call.dependency_json(METRIC_PARTIAL_FN)?;
                Ok(FrameMetricOutcome::Value(MetricValue::Json(count_from_partial(
                    partial,
                ))))
            }),
        ))?;
    }

    registry.register_metric(provider.member(
        UNEXPECTED_VALUES,
        MetricFnType::Value,
        MetricFn::frame(move |call| unexpected_values(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_INDEX_LIST,
        MetricFnType::Value,
        MetricFn::frame(move |call| unexpected_index_list(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_ROWS,
        MetricFnType::Value,
        MetricFn::frame(move |call| unexpected_rows(provider, call)),
    ))?;
    if provider.domain_type == MetricDomainType::Column {
        registry.register_metric(provider.member(
            UNEXPECTED_VALUE_COUNTS,
            MetricFnType::Value,
            MetricFn::frame(move |call| unexpected_value_counts(provider, call)),
        ))?;
    }
    Ok(())
}

fn unexpected_condition(
    provider: &MapMetricProvider,
    condition: FrameConditionFn,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let domain_kwargs = provider.condition_domain_kwargs(call.domain_kwargs())?;
    let domain = call
        .engine
        .get_compute_domain(&domain_kwargs, provider.domain_type)?;
    let columns = accessor_columns(&domain.accessor_kwargs, provider.domain_type)?;

    let schema = call.engine.batch_schema(&domain.compute_kwargs)?;
    let dtypes: Vec<DataType> = columns
        .iter()
        .map(|name| schema.get(name).cloned().unwrap_or(DataType::Null))
        .collect();

    let expected = condition(&FrameConditionInput {
        columns: &columns,
        dtypes: &dtypes,
        value_kwargs: call.value_kwargs(),
    })?;

    Ok(FrameMetricOutcome::Value(MetricValue::Frame(UnexpectedCondition {
        condition: expected.fill_null(lit(false)).not(),
        compute_kwargs: domain.compute_kwargs,
        accessor_kwargs: domain.accessor_kwargs,
    })))
}

fn dependency<'c>(call: &'c MetricCall<'_, FrameExecutionEngine>) -> Result<&'c FrameCondition> {
    match call.dependency(UNEXPECTED_CONDITION)? {
        MetricValue::Frame(condition) => Ok(condition),
        _ => Err(unexpected_dependency(call.metric_name(), UNEXPECTED_CONDITION)),
    }
}

/// The compute domain the condition was evaluated on.
fn condition_domain(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
    condition: &FrameCondition,
) -> Result<FrameDomain> {
    let kwargs = condition.compute_kwargs.merged(&condition.accessor_kwargs);
    Ok(call
        .engine
        .get_compute_domain(&kwargs, provider.domain_type)?
        .handle)
}

/// Rows of the domain the condition flags as unexpected.
fn unexpected_frame(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
    condition: &FrameCondition,
) -> Result<LazyFrame> {
    Ok(condition_domain(provider, call, condition)?.rows_where(condition.condition.clone()))
}

fn limited(frame: LazyFrame, limit: Option<usize>) -> LazyFrame {
    match limit {
        Some(n) => frame.limit(IdxSize::try_from(n).unwrap_or(IdxSize::MAX)),
        None => frame,
    }
}

fn select_columns(columns: &[String]) -> Vec<Expr> {
    columns.iter().map(|c| col(c)).collect()
}

fn unexpected_count(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let condition = dependency(call)?;
    let counted = call.engine.collect(
        unexpected_frame(provider, call, condition)?.select([len().alias(COUNT_COLUMN)]),
    )?;
    let count = counted
        .get_columns()
        .first()
        .map(series_to_json)
        .transpose()?
        .and_then(|values| values.into_iter().next())
        .unwrap_or(Value::from(0));
    Ok(FrameMetricOutcome::Value(MetricValue::Json(count_from_partial(&count))))
}

fn unexpected_values(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let condition = dependency(call)?;
    let columns = accessor_columns(&condition.accessor_kwargs, provider.domain_type)?;
    let frame = call.engine.collect(limited(
        unexpected_frame(provider, call, condition)?.select(select_columns(&columns)),
        result_limit(call.value_kwargs())?,
    ))?;

    let values = frame_rows(&frame, &columns)?
        .into_iter()
        .map(|row| shape_values(provider.domain_type, &columns, row))
        .collect();
    Ok(FrameMetricOutcome::Value(MetricValue::json(Value::Array(values))))
}

/// Positions of the unexpected rows in the loaded batch, or mappings of the
/// requested index columns when `unexpected_index_column_names` is set.
fn unexpected_index_list(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let condition = dependency(call)?;
    let format = ResultFormatConfig::from_value_kwargs(call.value_kwargs())?;
    let rows = unexpected_frame(provider, call, condition)?;

    let Some(names) = &format.unexpected_index_column_names else {
        let frame = call.engine.collect(limited(
            rows.select([col(ROW_INDEX_COLUMN)]),
            format.limit(),
        ))?;
        let positions = frame
            .get_columns()
            .first()
            .map(series_to_json)
            .transpose()?
            .unwrap_or_default();
        return Ok(FrameMetricOutcome::Value(MetricValue::json(Value::Array(
            positions,
        ))));
    };

    let mut columns = names.clone();
    for column in accessor_columns(&condition.accessor_kwargs, provider.domain_type)? {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    let frame = call.engine.collect(limited(
        rows.select(select_columns(&columns)),
        format.limit(),
    ))?;
    let entries = frame_rows(&frame, &columns)?
        .into_iter()
        .map(|row| Value::Object(columns.iter().cloned().zip(row).collect()))
        .collect();
    Ok(FrameMetricOutcome::Value(MetricValue::json(Value::Array(entries))))
}

fn unexpected_rows(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let condition = dependency(call)?;
    let columns = call.engine.batch_column_names(&condition.compute_kwargs)?;
    let frame = call.engine.collect(limited(
        unexpected_frame(provider, call, condition)?.select(select_columns(&columns)),
        result_limit(call.value_kwargs())?,
    ))?;
    Ok(FrameMetricOutcome::Value(MetricValue::Json(frame_to_records(&frame)?)))
}

fn unexpected_value_counts(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, FrameExecutionEngine>,
) -> Result<FrameMetricOutcome> {
    let condition = dependency(call)?;
    let columns = accessor_columns(&condition.accessor_kwargs, MetricDomainType::Column)?;
    let Some(column) = columns.first() else {
        return Ok(FrameMetricOutcome::Value(MetricValue::json(Value::Array(
            Vec::new(),
        ))));
    };

    let grouped = call.engine.collect(
        unexpected_frame(provider, call, condition)?
            .group_by([col(column)])
            .agg([len().alias(COUNT_COLUMN)]),
    )?;
    let counts = frame_rows(&grouped, &[column.clone(), COUNT_COLUMN.to_string()])?
        .into_iter()
        .map(|mut row| {
            let count = row.pop().and_then(|c| c.as_u64()).unwrap_or(0);
            (row.pop().unwrap_or(Value::Null), count)
        })
        .collect();
    Ok(FrameMetricOutcome::Value(MetricValue::json(sorted_value_counts(
        counts,
        result_limit(call.value_kwargs())?,
    ))))
}
