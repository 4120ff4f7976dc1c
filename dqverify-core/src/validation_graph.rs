//! Metric dependency graph.
//!
//! Nodes are metric configurations keyed by [`MetricId`]; edges come from
//! each provider's evaluation dependencies. Adding a metric expands its
//! dependencies transitively and deduplicates by id. Resolution order is a
//! sequence of levels where every node only depends on earlier levels.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::engine::EngineType;
use crate::metric_configuration::{MetricConfiguration, MetricId};
use crate::metric_value::MetricValues;
use crate::registry::{MetricRegistration, MetricRegistry};
use crate::{ExpectationsError, Result};

/// One metric in the graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Configuration with dependencies attached
    pub configuration: MetricConfiguration,
    /// Provider that computes it
    pub registration: Arc<MetricRegistration>,
    /// Ids this node needs; ids outside the graph are already resolved
    pub dependencies: BTreeSet<MetricId>,
}

/// Dependency graph for one resolution pass.
#[derive(Debug)]
pub struct ValidationGraph {
    engine: EngineType,
    registry: Arc<MetricRegistry>,
    nodes: BTreeMap<MetricId, GraphNode>,
}

impl ValidationGraph {
    /// Creates an empty graph for an engine.
    pub fn new(registry: Arc<MetricRegistry>, engine: EngineType) -> Self {
        Self {
            engine,
            registry,
            nodes: BTreeMap::new(),
        }
    }

    /// Adds a metric and, transitively, its dependencies.
    ///
    /// Metrics present in `already_resolved` are not expanded. Fails with a
    /// metric provider error if any metric in the closure has no provider on
    /// this engine, and with a dependency cycle error if a metric depends on
    /// itself.
    pub fn add_metric(
        &mut self,
        configuration: MetricConfiguration,
        already_resolved: &MetricValues,
    ) -> Result<MetricId> {
        let mut stack = Vec::new();
        self.expand(configuration, already_resolved, &mut stack)
    }

    fn expand(
        &mut self,
        configuration: MetricConfiguration,
        already_resolved: &MetricValues,
        stack: &mut Vec<MetricId>,
    ) -> Result<MetricId> {
        let id = configuration.id();

        if let Some(position) = stack.iter().position(|entry| *entry == id) {
            let cycle = stack[position..]
                .iter()
                .chain(std::iter::once(&id))
                .map(|entry| entry.metric_name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ExpectationsError::dependency_cycle(cycle));
        }
        if already_resolved.contains_key(&id) || self.nodes.contains_key(&id) {
            return Ok(id);
        }

        let registration = self
            .registry
            .get_metric_provider(&configuration.metric_name, self.engine)?;

        let mut configuration = configuration;
        if configuration.metric_dependencies.is_empty() {
            configuration.metric_dependencies = registration.evaluation_dependencies(&configuration)?;
        }

        stack.push(id.clone());
        let mut dependencies = BTreeSet::new();
        for dependency in configuration.metric_dependencies.values() {
            let dependency_id = self.expand(dependency.clone(), already_resolved, stack)?;
            dependencies.insert(dependency_id);
        }
        stack.pop();

        self.nodes.insert(
            id.clone(),
            GraphNode {
                configuration,
                registration,
                dependencies,
            },
        );
        Ok(id)
    }

    /// Engine the graph was built for.
    pub fn engine(&self) -> EngineType {
        self.engine
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a node.
    pub fn node(&self, id: &MetricId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Returns true if the id is a node.
    pub fn contains(&self, id: &MetricId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterates nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&MetricId, &GraphNode)> {
        self.nodes.iter()
    }

    /// Groups nodes into levels; a node's dependencies are all in earlier levels.
    pub fn resolution_levels(&self) -> Result<Vec<Vec<MetricId>>> {
        let mut done: BTreeSet<&MetricId> = BTreeSet::new();
        let mut levels = Vec::new();

        while done.len() < self.nodes.len() {
            let level: Vec<MetricId> = self
                .nodes
                .iter()
                .filter(|(id, _)| !done.contains(id))
                .filter(|(_, node)| {
                    node.dependencies
                        .iter()
                        .all(|dep| !self.nodes.contains_key(dep) || done.contains(dep))
                })
                .map(|(id, _)| id.clone())
                .collect();

            if level.is_empty() {
                let stuck = self
                    .nodes
                    .keys()
                    .filter(|id| !done.contains(id))
                    .map(|id| id.metric_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ExpectationsError::dependency_cycle(stuck));
            }

            for id in &level {
                if let Some((key, _)) = self.nodes.get_key_value(id) {
                    done.insert(key);
                }
            }
            levels.push(level);
        }

        Ok(levels)
    }

    /// The id and every id it depends on, transitively, that is in the graph.
    pub fn dependency_closure(&self, id: &MetricId) -> BTreeSet<MetricId> {
        let mut closure = BTreeSet::new();
        let mut pending = vec![id.clone()];
        while let Some(next) = pending.pop() {
            if !closure.insert(next.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&next) {
                pending.extend(node.dependencies.iter().cloned());
            }
        }
        closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricDomainType;
    use crate::kwargs::Kwargs;
    use crate::metric_value::MetricValue;
    use crate::registry::{MetricFn, MetricFnType};

    fn registration(name: &str, depends_on: Option<&'static str>) -> MetricRegistration {
        let registration = MetricRegistration::new(
            name,
            name,
            MetricFnType::Value,
            MetricDomainType::Table,
            MetricFn::table(|_call| Ok(MetricValue::json(0))),
        );
        match depends_on {
            Some(dep) => registration.with_dependencies(move |config| {
                let mut deps = BTreeMap::new();
                deps.insert("dep".to_string(), config.renamed(dep));
                Ok(deps)
            }),
            None => registration,
        }
    }

    fn registry(entries: &[(&str, Option<&'static str>)]) -> Arc<MetricRegistry> {
        let registry = MetricRegistry::new();
        for (name, dep) in entries {
            registry.register_metric(registration(name, *dep)).unwrap();
        }
        Arc::new(registry)
    }

    #[test]
    fn test_expansion_and_levels() {
        let registry = registry(&[("a", Some("b")), ("b", Some("c")), ("c", None)]);
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        graph
            .add_metric(
                MetricConfiguration::new("a", Kwargs::new(), Kwargs::new()),
                &MetricValues::new(),
            )
            .unwrap();

        assert_eq!(graph.len(), 3);
        let levels = graph.resolution_levels().unwrap();
        let names: Vec<Vec<&str>> = levels
            .iter()
            .map(|l| l.iter().map(|id| id.metric_name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["c"], vec!["b"], vec!["a"]]);
    }

    #[test]
    fn test_deduplication_by_id() {
        let registry = registry(&[("a", Some("c")), ("b", Some("c")), ("c", None)]);
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        for name in ["a", "b", "a"] {
            graph
                .add_metric(
                    MetricConfiguration::new(name, Kwargs::new(), Kwargs::new()),
                    &MetricValues::new(),
                )
                .unwrap();
        }
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_cycle_fails_fast() {
        let registry = registry(&[("a", Some("b")), ("b", Some("a"))]);
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        let err = graph
            .add_metric(
                MetricConfiguration::new("a", Kwargs::new(), Kwargs::new()),
                &MetricValues::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExpectationsError::DependencyCycle { ref cycle } if cycle == "a -> b -> a"));
    }

    #[test]
    fn test_missing_provider() {
        let registry = registry(&[("a", Some("missing"))]);
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        let err = graph
            .add_metric(
                MetricConfiguration::new("a", Kwargs::new(), Kwargs::new()),
                &MetricValues::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ExpectationsError::MetricProvider { ref metric_name, .. } if metric_name == "missing"));
    }

    #[test]
    fn test_already_resolved_is_not_expanded() {
        let registry = registry(&[("a", Some("b"))]);
        let mut resolved = MetricValues::new();
        resolved.insert(
            MetricConfiguration::new("b", Kwargs::new(), Kwargs::new()).id(),
            MetricValue::json(1),
        );
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        graph
            .add_metric(
                MetricConfiguration::new("a", Kwargs::new(), Kwargs::new()),
                &resolved,
            )
            .unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.resolution_levels().unwrap().len(), 1);
    }

    #[test]
    fn test_dependency_closure() {
        let registry = registry(&[("a", Some("b")), ("b", None)]);
        let mut graph = ValidationGraph::new(registry, EngineType::Table);
        let id = graph
            .add_metric(
                MetricConfiguration::new("a", Kwargs::new(), Kwargs::new()),
                &MetricValues::new(),
            )
            .unwrap();
        assert_eq!(graph.dependency_closure(&id).len(), 2);
    }
}
