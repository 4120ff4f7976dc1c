//! Metric registry.
//!
//! Maps `(metric_name, engine)` to a provider. The process-wide registry is
//! populated once by [`register_builtin_metrics`](crate::metrics::register_builtin_metrics)
//! on first use; engines can be given their own registry for isolation.
//!
//! Registration is write-once per key: registering the same metric class
//! again is a no-op, registering a different class under a taken key fails.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::domain::MetricDomainType;
use crate::engine::table::{TableExecutionEngine, TableMetricFn};
use crate::engine::{EngineType, MetricCall};
use crate::metric_configuration::MetricConfiguration;
use crate::metric_value::MetricValue;
use crate::{ExpectationsError, Result};

#[cfg(feature = "polars")]
use crate::engine::frame::{FrameExecutionEngine, FrameMetricFn, FrameMetricOutcome};
#[cfg(feature = "sqlite")]
use crate::engine::sql::{SqlExecutionEngine, SqlMetricFn, SqlMetricOutcome};

/// How a provider computes its metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFnType {
    /// Final value computed directly
    Value,
    /// Per-row values
    MapFn,
    /// Per-row boolean condition
    MapCondition,
    /// Per-row condition that needs a window over the whole domain
    WindowConditionFn,
    /// Aggregate partial, bundled per compute domain
    AggregateFn,
    /// Filtered data computed directly by the backend
    Data,
}

impl MetricFnType {
    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::MapFn => "map_fn",
            Self::MapCondition => "map_condition",
            Self::WindowConditionFn => "window_condition_fn",
            Self::AggregateFn => "aggregate_fn",
            Self::Data => "data",
        }
    }
}

/// Backend function of a registration.
#[derive(Clone)]
pub enum MetricFn {
    /// In-memory table provider
    Table(TableMetricFn),
    /// SQL provider
    #[cfg(feature = "sqlite")]
    Sql(SqlMetricFn),
    /// Dataframe provider
    #[cfg(feature = "polars")]
    Frame(FrameMetricFn),
}

impl MetricFn {
    /// Wraps an in-memory table provider.
    pub fn table<F>(provider: F) -> Self
    where
        F: Fn(&MetricCall<'_, TableExecutionEngine>) -> Result<MetricValue> + Send + Sync + 'static,
    {
        Self::Table(Arc::new(provider))
    }

    /// Wraps a SQL provider.
    #[cfg(feature = "sqlite")]
    pub fn sql<F>(provider: F) -> Self
    where
        F: Fn(&MetricCall<'_, SqlExecutionEngine>) -> Result<SqlMetricOutcome>
            + Send
            + Sync
            + 'static,
    {
        Self::Sql(Arc::new(provider))
    }

    /// Wraps a dataframe provider.
    #[cfg(feature = "polars")]
    pub fn frame<F>(provider: F) -> Self
    where
        F: Fn(&MetricCall<'_, FrameExecutionEngine>) -> Result<FrameMetricOutcome>
            + Send
            + Sync
            + 'static,
    {
        Self::Frame(Arc::new(provider))
    }

    /// Engine this function runs on.
    pub fn engine_type(&self) -> EngineType {
        match self {
            Self::Table(_) => EngineType::Table,
            #[cfg(feature = "sqlite")]
            Self::Sql(_) => EngineType::Sql,
            #[cfg(feature = "polars")]
            Self::Frame(_) => EngineType::Frame,
        }
    }
}

/// Builds a metric's dependencies from its configuration.
pub type DependencyFn =
    Arc<dyn Fn(&MetricConfiguration) -> Result<BTreeMap<String, MetricConfiguration>> + Send + Sync>;

/// One registry entry.
#[derive(Clone)]
pub struct MetricRegistration {
    /// Registered metric name
    pub metric_name: String,
    /// Identifies the provider; equal classes are the same provider
    pub metric_class: String,
    /// Engine the provider runs on
    pub engine: EngineType,
    /// Computation kind
    pub fn_type: MetricFnType,
    /// Domain type the metric reads
    pub domain_type: MetricDomainType,
    /// Accepted domain keys
    pub domain_keys: Vec<String>,
    /// Accepted value keys
    pub value_keys: Vec<String>,
    /// Backend function
    pub provider: MetricFn,
    /// Dependency builder; `None` means no dependencies
    pub dependencies: Option<DependencyFn>,
}

impl std::fmt::Debug for MetricRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistration")
            .field("metric_name", &self.metric_name)
            .field("metric_class", &self.metric_class)
            .field("engine", &self.engine)
            .field("fn_type", &self.fn_type)
            .field("domain_type", &self.domain_type)
            .field("domain_keys", &self.domain_keys)
            .field("value_keys", &self.value_keys)
            .field("has_dependencies", &self.dependencies.is_some())
            .finish()
    }
}

impl MetricRegistration {
    /// Creates a registration with default domain keys for the domain type.
    pub fn new(
        metric_name: impl Into<String>,
        metric_class: impl Into<String>,
        fn_type: MetricFnType,
        domain_type: MetricDomainType,
        provider: MetricFn,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_class: metric_class.into(),
            engine: provider.engine_type(),
            fn_type,
            domain_type,
            domain_keys: domain_type
                .default_domain_keys()
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            value_keys: Vec::new(),
            provider,
            dependencies: None,
        }
    }

    /// Builder method to set value keys.
    pub fn with_value_keys(mut self, value_keys: &[&str]) -> Self {
        self.value_keys = value_keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Builder method to set domain keys.
    pub fn with_domain_keys(mut self, domain_keys: &[&str]) -> Self {
        self.domain_keys = domain_keys.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Builder method to set the dependency builder.
    pub fn with_dependencies<F>(mut self, dependencies: F) -> Self
    where
        F: Fn(&MetricConfiguration) -> Result<BTreeMap<String, MetricConfiguration>>
            + Send
            + Sync
            + 'static,
    {
        self.dependencies = Some(Arc::new(dependencies));
        self
    }

    /// Dependencies of a configuration of this metric.
    pub fn evaluation_dependencies(
        &self,
        configuration: &MetricConfiguration,
    ) -> Result<BTreeMap<String, MetricConfiguration>> {
        match &self.dependencies {
            Some(build) => build(configuration),
            None => Ok(BTreeMap::new()),
        }
    }
}

type RegistryKey = (String, EngineType);

/// Thread-safe metric registry.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    entries: RwLock<HashMap<RegistryKey, Arc<MetricRegistration>>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in metric.
    pub fn with_builtin_metrics() -> Result<Self> {
        let registry = Self::new();
        crate::metrics::register_builtin_metrics(&registry)?;
        Ok(registry)
    }

    /// Registers a provider.
    ///
    /// Re-registering the same `metric_class` under a key is a no-op;
    /// a different class under a taken key is a configuration error.
    pub fn register_metric(&self, registration: MetricRegistration) -> Result<()> {
        let key = (registration.metric_name.clone(), registration.engine);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(&key) {
            if existing.metric_class == registration.metric_class
                && existing.fn_type == registration.fn_type
            {
                tracing::trace!(
                    metric = %registration.metric_name,
                    engine = %registration.engine,
                    "Metric already registered"
                );
                return Ok(());
            }
            return Err(ExpectationsError::configuration(format!(
                "metric '{}' is already registered for {} by {}; refusing {}",
                registration.metric_name,
                registration.engine,
                existing.metric_class,
                registration.metric_class
            )));
        }

        entries.insert(key, Arc::new(registration));
        Ok(())
    }

    /// Looks up a provider.
    pub fn find(&self, metric_name: &str, engine: EngineType) -> Option<Arc<MetricRegistration>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(metric_name.to_string(), engine))
            .cloned()
    }

    /// Looks up a provider, failing with a metric provider error when absent.
    pub fn get_metric_provider(
        &self,
        metric_name: &str,
        engine: EngineType,
    ) -> Result<Arc<MetricRegistration>> {
        self.find(metric_name, engine)
            .ok_or_else(|| ExpectationsError::metric_provider(metric_name, engine))
    }

    /// All registered `(metric_name, engine)` pairs, sorted.
    pub fn list_registered_metrics(&self) -> Vec<(String, EngineType)> {
        let mut keys: Vec<RegistryKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Metric names registered for one engine, sorted.
    pub fn metrics_for_engine(&self, engine: EngineType) -> Vec<String> {
        self.list_registered_metrics()
            .into_iter()
            .filter(|(_, e)| *e == engine)
            .map(|(name, _)| name)
            .collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

static GLOBAL_REGISTRY: LazyLock<Arc<MetricRegistry>> = LazyLock::new(|| {
    let registry = MetricRegistry::new();
    if let Err(e) = crate::metrics::register_builtin_metrics(&registry) {
        tracing::error!("Failed to register built-in metrics: {}", e);
    }
    Arc::new(registry)
});

/// The process-wide registry, bootstrapped with the built-in metrics.
pub fn global_registry() -> Arc<MetricRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}

/// Clears the process-wide registry and registers the built-ins again.
///
/// Test hook; engines created earlier share the same registry and see the
/// reset.
pub fn reset_registry() -> Result<()> {
    let registry = global_registry();
    registry.clear();
    crate::metrics::register_builtin_metrics(&registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i64) -> MetricFn {
        MetricFn::table(move |_call| Ok(MetricValue::json(value)))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = MetricRegistry::new();
        registry
            .register_metric(MetricRegistration::new(
                "test.constant",
                "Constant",
                MetricFnType::Value,
                MetricDomainType::Table,
                constant(1),
            ))
            .unwrap();

        assert!(registry.find("test.constant", EngineType::Table).is_some());
        let err = registry
            .get_metric_provider("test.constant", EngineType::Sql)
            .unwrap_err();
        assert!(matches!(err, ExpectationsError::MetricProvider { .. }));
    }

    #[test]
    fn test_identical_registration_is_idempotent() {
        let registry = MetricRegistry::new();
        for _ in 0..2 {
            registry
                .register_metric(MetricRegistration::new(
                    "test.constant",
                    "Constant",
                    MetricFnType::Value,
                    MetricDomainType::Table,
                    constant(1),
                ))
                .unwrap();
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let registry = MetricRegistry::new();
        registry
            .register_metric(MetricRegistration::new(
                "test.constant",
                "Constant",
                MetricFnType::Value,
                MetricDomainType::Table,
                constant(1),
            ))
            .unwrap();
        let err = registry
            .register_metric(MetricRegistration::new(
                "test.constant",
                "OtherConstant",
                MetricFnType::Value,
                MetricDomainType::Table,
                constant(2),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("OtherConstant"));
    }

    #[test]
    fn test_builtin_registry_is_populated() {
        let registry = MetricRegistry::with_builtin_metrics().unwrap();
        let table_metrics = registry.metrics_for_engine(EngineType::Table);
        assert!(table_metrics.contains(&"table.row_count".to_string()));
        assert!(table_metrics.contains(&"column_values.nonnull.unexpected_count".to_string()));
        assert!(
            registry
                .list_registered_metrics()
                .windows(2)
                .all(|w| w[0] <= w[1])
        );
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = global_registry();
        let b = global_registry();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_empty());
    }
}
