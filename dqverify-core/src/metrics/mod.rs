//! Built-in metrics.
//!
//! Every provider here is a static value. [`register_builtin_metrics`] walks
//! the tables and registers each provider for the engines it supports; the
//! process-wide registry calls it once on first use.
//!
//! # Families
//! - `table.*`: row count, column names and types
//! - `column.*`: max, min, mean, sum, distinct values and uniform partitions
//! - `column_values.*`: column map conditions, including JSON checks, and
//!   their unexpected-* families
//! - `column_pair_values.equal`, `multicolumn_sum.equal`
//! - `query.table`, `unexpected_rows_query.table`: raw SQL (feature `sqlite`)

pub mod column_aggregate;
pub mod column_json;
pub mod column_map;
pub mod column_pair_map;
pub mod multicolumn_map;
pub mod table;

#[cfg(feature = "sqlite")]
pub mod query;

use crate::Result;
use crate::provider::aggregate::AggregateMetricProvider;
use crate::provider::map::MapMetricProvider;
use crate::registry::MetricRegistry;

static MAP_PROVIDERS: &[&MapMetricProvider] = &[
    &column_map::NONNULL,
    &column_map::NULL,
    &column_map::BETWEEN,
    &column_map::IN_SET,
    &column_map::MATCH_REGEX,
    &column_map::UNIQUE,
    &column_json::JSON_PARSEABLE,
    &column_json::MATCH_JSON_SCHEMA,
    &column_pair_map::EQUAL,
    &multicolumn_map::SUM_EQUAL,
];

static AGGREGATE_PROVIDERS: &[&AggregateMetricProvider] = &[
    &table::ROW_COUNT,
    &column_aggregate::MAX,
    &column_aggregate::MIN,
    &column_aggregate::MEAN,
    &column_aggregate::SUM,
];

/// Every built-in map provider.
pub fn map_providers() -> impl Iterator<Item = &'static MapMetricProvider> {
    MAP_PROVIDERS.iter().copied()
}

/// Every built-in aggregate provider.
pub fn aggregate_providers() -> impl Iterator<Item = &'static AggregateMetricProvider> {
    AGGREGATE_PROVIDERS.iter().copied()
}

/// Registers every built-in metric.
///
/// Safe to call repeatedly on the same registry.
pub fn register_builtin_metrics(registry: &MetricRegistry) -> Result<()> {
    for provider in aggregate_providers() {
        provider.register(registry)?;
    }
    for provider in map_providers() {
        provider.register(registry)?;
    }
    table::register(registry)?;
    column_aggregate::register(registry)?;
    column_map::register(registry)?;
    #[cfg(feature = "sqlite")]
    query::register(registry)?;

    tracing::debug!(metrics = registry.len(), "Registered built-in metrics");
    Ok(())
}
