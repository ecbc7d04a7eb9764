//! Module dependency graph.
//!
//! Nodes are module names, an edge `a → b` means "`a` depends on `b`". The
//! graph only stores structure; construction and start order are derived
//! from it by [`ModuleManager`](crate::ModuleManager).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphError;

/// Directed dependency graph over module names.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// module → its direct dependencies, in declaration order.
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module without dependencies.
    pub fn add_module(&mut self, name: &str) -> Result<(), GraphError> {
        if self.edges.contains_key(name) {
            return Err(GraphError::DuplicateModule(name.to_string()));
        }
        self.edges.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Declares that `module` depends on each of `dependencies`.
    ///
    /// Both ends must already be modules of the graph. Repeated edges are
    /// collapsed.
    pub fn add_dependencies(
        &mut self,
        module: &str,
        dependencies: &[String],
    ) -> Result<(), GraphError> {
        for dependency in dependencies {
            if !self.edges.contains_key(dependency.as_str()) {
                return Err(GraphError::UnknownDependency {
                    module: module.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        let edges = self
            .edges
            .get_mut(module)
            .ok_or_else(|| GraphError::UnknownModule(module.to_string()))?;
        for dependency in dependencies {
            if !edges.contains(dependency) {
                edges.push(dependency.clone());
            }
        }
        Ok(())
    }

    /// Returns `true` if `name` is a module of the graph.
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if the graph has no modules.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Modules that directly depend on `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(module, _)| module.clone())
            .collect()
    }

    /// Groups modules into layers with Kahn's algorithm.
    ///
    /// Every module only depends on modules of earlier layers; modules inside
    /// a layer are sorted by name.
    ///
    /// # Errors
    ///
    /// [`GraphError::DependencyCycle`] naming every module that could not be
    /// placed. A module depending on itself counts as a cycle.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(module, deps)| (module.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (module, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(module.as_str());
            }
        }

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&module, _)| module)
            .collect();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next: BTreeSet<&str> = BTreeSet::new();
            for &module in &current {
                for &dependent in dependents.get(module).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            layers.push(current.iter().map(|m| m.to_string()).collect());
            current = next.into_iter().collect();
        }

        if placed != self.edges.len() {
            let modules = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(module, _)| module.to_string())
                .collect();
            return Err(GraphError::DependencyCycle { modules });
        }
        Ok(layers)
    }

    /// Checks the graph for cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.layers().map(|_| ())
    }

    /// Returns `targets` and everything they transitively depend on, each
    /// module exactly once and always after its dependencies.
    ///
    /// Unknown targets are ignored. Assumes the graph was validated.
    pub fn transitive_deps(&self, targets: &[String]) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        for target in targets {
            self.visit(target, &mut visited, &mut order);
        }
        order
    }

    fn visit<'a>(&'a self, module: &str, visited: &mut BTreeSet<&'a str>, order: &mut Vec<String>) {
        let Some((name, deps)) = self.edges.get_key_value(module) else {
            return;
        };
        if !visited.insert(name.as_str()) {
            return;
        }
        for dep in deps {
            self.visit(dep, visited, order);
        }
        order.push(name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(modules: &[&str], edges: &[(&str, &[&str])]) -> Result<DependencyGraph, GraphError> {
        let mut graph = DependencyGraph::new();
        for module in modules {
            graph.add_module(module)?;
        }
        for (module, deps) in edges {
            let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
            graph.add_dependencies(module, &deps)?;
        }
        Ok(graph)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_layers_follow_dependencies() {
        let g = graph(
            &["api", "store", "cache", "server"],
            &[("server", &["api"]), ("api", &["store", "cache"])],
        )
        .unwrap();
        let layers = g.layers().unwrap();
        assert_eq!(
            layers,
            vec![names(&["cache", "store"]), names(&["api"]), names(&["server"])]
        );
        assert_eq!(g.dependents("api"), names(&["server"]));
    }

    #[test]
    fn test_transitive_deps_visits_each_module_once() {
        let g = graph(
            &["a", "b", "c", "d", "unused"],
            &[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"])],
        )
        .unwrap();
        assert_eq!(g.transitive_deps(&names(&["a"])), names(&["d", "b", "c", "a"]));
        assert_eq!(g.transitive_deps(&names(&["c", "b"])), names(&["d", "c", "b"]));
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&["a", "b", "c"], &[("a", &["b"]), ("b", &["a"])]).unwrap();
        let err = g.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::DependencyCycle {
                modules: names(&["a", "b"])
            }
        );

        let self_loop = graph(&["solo"], &[("solo", &["solo"])]).unwrap();
        assert!(matches!(self_loop.validate(), Err(GraphError::DependencyCycle { .. })));
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            graph(&["a", "a"], &[]).unwrap_err(),
            GraphError::DuplicateModule("a".into())
        );
        assert_eq!(
            graph(&["a"], &[("a", &["ghost"])]).unwrap_err(),
            GraphError::UnknownDependency {
                module: "a".into(),
                dependency: "ghost".into()
            }
        );
        assert_eq!(
            graph(&["a"], &[("ghost", &["a"])]).unwrap_err(),
            GraphError::UnknownModule("ghost".into())
        );
    }
}
