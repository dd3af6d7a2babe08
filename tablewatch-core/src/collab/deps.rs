//! Component dependency graph

use std::collections::{BTreeMap, BTreeSet};

/// Declared dependencies between top-level state components
pub trait DependencyGraph: Send + Sync {
    /// Components that depend on `component`
    fn dependents(&self, component: &str) -> Vec<String>;

    /// Components `component` depends on
    fn dependencies(&self, component: &str) -> Vec<String>;
}

/// Dependency graph built from a fixed `component -> [dependencies]` map
#[derive(Debug, Clone, Default)]
pub struct StaticDependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl StaticDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a map of component to its dependencies
    pub fn from_map<I, K, V>(map: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut graph = Self::new();
        for (component, deps) in map {
            let component = component.into();
            for dep in deps {
                graph.add_dependency(component.clone(), dep);
            }
        }
        graph
    }

    /// Declare that `component` depends on `dependency`
    pub fn add_dependency(&mut self, component: impl Into<String>, dependency: impl Into<String>) {
        let component = component.into();
        let dependency = dependency.into();
        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(component.clone());
        self.dependencies
            .entry(component)
            .or_default()
            .insert(dependency);
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl DependencyGraph for StaticDependencyGraph {
    fn dependents(&self, component: &str) -> Vec<String> {
        self.dependents
            .get(component)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn dependencies(&self, component: &str) -> Vec<String> {
        self.dependencies
            .get(component)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
