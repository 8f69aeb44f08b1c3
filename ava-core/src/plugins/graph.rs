//! Dependency graph and load ordering

use std::collections::{BTreeMap, BTreeSet, HashSet};

use ava_plugin_api::PluginDescriptor;

/// Forward and reverse dependency edges between registered plugins.
/// Edges may name plugins that are not registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    depends_on: BTreeMap<String, BTreeSet<String>>,
    depended_by: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a set of descriptors
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a PluginDescriptor>) -> Self {
        let mut graph = Self::default();
        for descriptor in descriptors {
            graph.add(descriptor);
        }
        graph
    }

    fn add(&mut self, descriptor: &PluginDescriptor) {
        self.depends_on
            .entry(descriptor.name.clone())
            .or_default()
            .extend(descriptor.dependencies.iter().cloned());
        self.depended_by.entry(descriptor.name.clone()).or_default();
        for dep in &descriptor.dependencies {
            self.depended_by
                .entry(dep.clone())
                .or_default()
                .insert(descriptor.name.clone());
        }
    }

    /// Direct dependencies of `name`, in lexical order
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depends_on
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Plugins that directly depend on `name`, in lexical order
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depended_by
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.depends_on.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.depends_on.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depends_on.is_empty()
    }

    /// Order `names` so that every dependency precedes its dependents.
    ///
    /// Only edges between requested names are followed. Roots and
    /// dependencies are visited in lexical order, so the result is
    /// deterministic. A cycle is logged and broken at the edge that closes
    /// it; every requested name appears exactly once.
    pub fn load_order<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let requested: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let mut walk = Walk {
            graph: self,
            requested: &requested,
            visiting: HashSet::new(),
            visited: HashSet::new(),
            order: Vec::with_capacity(requested.len()),
        };
        for &name in &requested {
            walk.visit(name);
        }
        walk.order
    }
}

struct Walk<'a> {
    graph: &'a DependencyGraph,
    requested: &'a BTreeSet<&'a str>,
    visiting: HashSet<&'a str>,
    visited: HashSet<&'a str>,
    order: Vec<String>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, name: &'a str) {
        if self.visited.contains(name) {
            return;
        }
        if self.visiting.contains(name) {
            tracing::warn!(plugin = %name, "Circular dependency detected, load order within the cycle is arbitrary");
            return;
        }

        self.visiting.insert(name);
        let graph = self.graph;
        for dep in graph.dependencies(name) {
            if let Some(&dep) = self.requested.get(dep) {
                self.visit(dep);
            }
        }
        self.visiting.remove(name);

        self.visited.insert(name);
        self.order.push(name.to_string());
    }
}
