//! Map family on the SQL engine.
//!
//! The condition resolves to a boolean SQL expression selecting the
//! unexpected rows, with the domain's own filter folded in so the expression
//! stands alone against the batch. Members select through it.

use serde_json::Value;

use super::{
    AGGREGATE_FN, CONDITION, MapMetricProvider, SqlConditionFn, SqlConditionInput,
    UNEXPECTED_CONDITION, UNEXPECTED_COUNT, UNEXPECTED_INDEX_LIST, UNEXPECTED_INDEX_QUERY,
    UNEXPECTED_ROWS, UNEXPECTED_VALUE_COUNTS, UNEXPECTED_VALUES, count_from_partial,
};
use crate::config::ResultFormatConfig;
use crate::domain::MetricDomainType;
use crate::engine::MetricCall;
use crate::engine::sql::{SqlExecutionEngine, SqlMetricOutcome, SqlSelectable, quote_identifier};
use crate::kwargs::Kwargs;
use crate::metric_value::{MetricValue, SqlCondition, UnexpectedCondition, sorted_value_counts};
use crate::provider::{
    METRIC_PARTIAL_FN, accessor_columns, result_limit, shape_values, unexpected_dependency,
};
use crate::registry::{MetricFn, MetricFnType, MetricRegistry};
use crate::{ExpectationsError, Result};

pub(super) fn register(
    provider: &'static MapMetricProvider,
    condition: SqlConditionFn,
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
        MetricFn::sql(move |call| unexpected_condition(provider, condition, call)),
    ))?;
    registry.register_metric(provider.member(
        &format!("{}.{}", UNEXPECTED_COUNT, AGGREGATE_FN),
        MetricFnType::AggregateFn,
        MetricFn::sql(|call| {
            let condition = dependency(call)?;
            Ok(SqlMetricOutcome::Aggregate {
                expression: format!("SUM(CASE WHEN {} THEN 1 ELSE 0 END)", condition.condition),
                domain_kwargs: condition.compute_kwargs.clone(),
            })
        }),
    ))?;
    registry.register_metric(provider.from_partial(
        UNEXPECTED_COUNT,
        MetricFn::sql(|call| {
            let partial = call.dependency_json(METRIC_PARTIAL_FN)?;
            Ok(SqlMetricOutcome::Value(MetricValue::Json(count_from_partial(partial))))
        }),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_VALUES,
        MetricFnType::Value,
        MetricFn::sql(move |call| unexpected_values(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_INDEX_LIST,
        MetricFnType::Value,
        MetricFn::sql(move |call| unexpected_index_list(provider, call)),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_ROWS,
        MetricFnType::Value,
        MetricFn::sql(unexpected_rows),
    ))?;
    registry.register_metric(provider.member(
        UNEXPECTED_INDEX_QUERY,
        MetricFnType::Value,
        MetricFn::sql(move |call| unexpected_index_query(provider, call)),
    ))?;
    if provider.domain_type == MetricDomainType::Column {
        registry.register_metric(provider.member(
            UNEXPECTED_VALUE_COUNTS,
            MetricFnType::Value,
            MetricFn::sql(unexpected_value_counts),
        ))?;
    }
    Ok(())
}

fn unexpected_condition(
    provider: &MapMetricProvider,
    condition: SqlConditionFn,
    call: &MetricCall<'_, SqlExecutionEngine>,
) -> Result<SqlMetricOutcome> {
    let domain_kwargs = provider.condition_domain_kwargs(call.domain_kwargs())?;
    let domain = call
        .engine
        .get_compute_domain(&domain_kwargs, provider.domain_type)?;
    let columns = accessor_columns(&domain.accessor_kwargs, provider.domain_type)?;

    let batch_columns = call.engine.batch_columns(&domain.compute_kwargs)?;
    let (column_types, storage_classes): (Vec<String>, Vec<Vec<String>>) = columns
        .iter()
        .map(|name| {
            batch_columns
                .iter()
                .find(|c| c.name == *name)
                .map(|c| (c.type_name.clone(), c.storage_classes.clone()))
                .unwrap_or_default()
        })
        .unzip();

    let expected = condition(&SqlConditionInput {
        columns: &columns,
        column_types: &column_types,
        storage_classes: &storage_classes,
        value_kwargs: call.value_kwargs(),
        domain: &domain.handle,
    })?;
    let unexpected = format!("NOT COALESCE(({}), 0)", expected);
    let condition = match &domain.handle.filter {
        Some(filter) => format!("({}) AND ({})", filter, unexpected),
        None => unexpected,
    };

    Ok(SqlMetricOutcome::Value(MetricValue::Sql(UnexpectedCondition {
        condition,
        compute_kwargs: domain.compute_kwargs,
        accessor_kwargs: domain.accessor_kwargs,
    })))
}

fn dependency<'c>(call: &'c MetricCall<'_, SqlExecutionEngine>) -> Result<&'c SqlCondition> {
    match call.dependency(UNEXPECTED_CONDITION)? {
        MetricValue::Sql(condition) => Ok(condition),
        _ => Err(unexpected_dependency(call.metric_name(), UNEXPECTED_CONDITION)),
    }
}

/// The batch restricted to the unexpected rows.
fn unexpected_selectable(
    call: &MetricCall<'_, SqlExecutionEngine>,
    condition: &SqlCondition,
) -> Result<SqlSelectable> {
    let domain = call
        .engine
        .get_compute_domain(&condition.compute_kwargs, MetricDomainType::Table)?;
    Ok(domain.handle.and_where(condition.condition.clone()))
}

fn quoted_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn limited(sql: String, limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!("{} LIMIT {}", sql, n),
        None => sql,
    }
}

fn unexpected_values(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, SqlExecutionEngine>,
) -> Result<SqlMetricOutcome> {
    let condition = dependency(call)?;
    let columns = accessor_columns(&condition.accessor_kwargs, provider.domain_type)?;
    let sql = limited(
        unexpected_selectable(call, condition)?.select(&quoted_list(&columns)),
        result_limit(call.value_kwargs())?,
    );

    let domain_type = provider.domain_type;
    Ok(SqlMetricOutcome::query(sql, move |records| {
        Ok(MetricValue::json(Value::Array(
            records
                .into_iter()
                .map(|record| shape_values(domain_type, &columns, record.values))
                .collect(),
        )))
    }))
}

/// SQL rows carry no stable position, so the index list is only available
/// as mappings of `unexpected_index_column_names`.
fn unexpected_index_list(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, SqlExecutionEngine>,
) -> Result<SqlMetricOutcome> {
    let condition = dependency(call)?;
    let format = ResultFormatConfig::from_value_kwargs(call.value_kwargs())?;
    let Some(names) = &format.unexpected_index_column_names else {
        return Err(ExpectationsError::provider_message(
            call.metric_name(),
            "SQL batches have no row index; set unexpected_index_column_names",
        ));
    };

    let columns = index_columns(names, &condition.accessor_kwargs, provider.domain_type)?;
    let sql = limited(
        unexpected_selectable(call, condition)?.select(&quoted_list(&columns)),
        format.limit(),
    );
    Ok(SqlMetricOutcome::query(sql, |records| {
        Ok(MetricValue::json(Value::Array(
            records.iter().map(|record| record.to_object()).collect(),
        )))
    }))
}

/// Query selecting the unexpected rows, returned as text.
fn unexpected_index_query(
    provider: &MapMetricProvider,
    call: &MetricCall<'_, SqlExecutionEngine>,
) -> Result<SqlMetricOutcome> {
    let condition = dependency(call)?;
    let format = ResultFormatConfig::from_value_kwargs(call.value_kwargs())?;
    let selectable = unexpected_selectable(call, condition)?;
    let sql = match &format.unexpected_index_column_names {
        Some(names) => selectable.select(&quoted_list(&index_columns(
            names,
            &condition.accessor_kwargs,
            provider.domain_type,
        )?)),
        None => selectable.select("*"),
    };
    Ok(SqlMetricOutcome::Value(MetricValue::json(sql)))
}

fn index_columns(
    names: &[String],
    accessor_kwargs: &Kwargs,
    domain_type: MetricDomainType,
) -> Result<Vec<String>> {
    let mut columns = names.to_vec();
    for column in accessor_columns(accessor_kwargs, domain_type)? {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    Ok(columns)
}

fn unexpected_rows(call: &MetricCall<'_, SqlExecutionEngine>) -> Result<SqlMetricOutcome> {
    let condition = dependency(call)?;
    let sql = limited(
        unexpected_selectable(call, condition)?.select("*"),
        result_limit(call.value_kwargs())?,
    );
    Ok(SqlMetricOutcome::query(sql, |records| {
        Ok(MetricValue::json(Value::Array(
            records.iter().map(|record| record.to_object()).collect(),
        )))
    }))
}

fn unexpected_value_counts(call: &MetricCall<'_, SqlExecutionEngine>) -> Result<SqlMetricOutcome> {
    let condition = dependency(call)?;
    let columns = accessor_columns(&condition.accessor_kwargs, MetricDomainType::Column)?;
    let column = columns.first().map(|c| quote_identifier(c)).unwrap_or_default();
    let sql = format!(
        "{} GROUP BY {}",
        unexpected_selectable(call, condition)?.select(&format!(
            "{} AS \"value\", COUNT(*) AS \"count\"",
            column
        )),
        column
    );

    let limit = result_limit(call.value_kwargs())?;
    Ok(SqlMetricOutcome::query(sql, move |records| {
        let counts = records
            .iter()
            .map(|record| {
                let value = record.get("value").cloned().unwrap_or(Value::Null);
                let count = record.get("count").and_then(Value::as_u64).unwrap_or(0);
                (value, count)
            })
            .collect();
        Ok(MetricValue::json(sorted_value_counts(counts, limit)))
    }))
}
