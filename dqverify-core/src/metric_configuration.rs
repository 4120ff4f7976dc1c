//! Metric configurations and their identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kwargs::Kwargs;

/// Deterministic identity of a metric: `(name, domain_kwargs_id, value_kwargs_id)`.
///
/// Two configurations with the same identity are the same metric and resolve
/// to one cached value per resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    /// Registered metric name
    pub metric_name: String,
    /// Canonical form of the domain kwargs
    pub domain_kwargs_id: String,
    /// Canonical form of the value kwargs
    pub value_kwargs_id: String,
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.metric_name, self.domain_kwargs_id, self.value_kwargs_id
        )
    }
}

/// A request for one metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfiguration {
    /// Registered metric name, e.g. `column_values.nonnull.unexpected_count`
    pub metric_name: String,
    /// Which data the metric reads
    pub metric_domain_kwargs: Kwargs,
    /// Parameters that do not change the data read
    #[serde(default)]
    pub metric_value_kwargs: Kwargs,
    /// Named dependencies, filled from the provider when left empty
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metric_dependencies: BTreeMap<String, MetricConfiguration>,
}

impl MetricConfiguration {
    /// Creates a configuration with no dependencies attached.
    pub fn new(
        metric_name: impl Into<String>,
        metric_domain_kwargs: Kwargs,
        metric_value_kwargs: Kwargs,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_domain_kwargs,
            metric_value_kwargs,
            metric_dependencies: BTreeMap::new(),
        }
    }

    /// Builder method to attach a named dependency.
    pub fn with_dependency(mut self, name: impl Into<String>, dependency: MetricConfiguration) -> Self {
        self.metric_dependencies.insert(name.into(), dependency);
        self
    }

    /// Identity of this configuration. Dependencies do not take part.
    pub fn id(&self) -> MetricId {
        MetricId {
            metric_name: self.metric_name.clone(),
            domain_kwargs_id: self.metric_domain_kwargs.to_id(),
            value_kwargs_id: self.metric_value_kwargs.to_id(),
        }
    }

    /// Returns a copy with a different metric name and the same kwargs.
    pub fn renamed(&self, metric_name: impl Into<String>) -> Self {
        Self::new(
            metric_name,
            self.metric_domain_kwargs.clone(),
            self.metric_value_kwargs.clone(),
        )
    }
}

impl std::fmt::Display for MetricConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.id().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ignores_dependencies() {
        let base = MetricConfiguration::new(
            "column.max",
            Kwargs::new().with("column", "a"),
            Kwargs::new(),
        );
        let with_dep = base.clone().with_dependency("metric_partial_fn", base.renamed("x"));
        assert_eq!(base.id(), with_dep.id());
    }

    #[test]
    fn test_id_display() {
        let config = MetricConfiguration::new("table.row_count", Kwargs::new(), Kwargs::new());
        assert_eq!(config.id().to_string(), "(table.row_count, (), ())");
    }

    #[test]
    fn test_distinct_value_kwargs_distinct_ids() {
        let a = MetricConfiguration::new(
            "column_values.between.unexpected_count",
            Kwargs::new().with("column", "a"),
            Kwargs::new().with("min_value", 1),
        );
        let b = MetricConfiguration::new(
            "column_values.between.unexpected_count",
            Kwargs::new().with("column", "a"),
            Kwargs::new().with("min_value", 2),
        );
        assert_ne!(a.id(), b.id());
    }
}
