//! Module registry and service construction.
//!
//! Modules are registered by name with a constructor. Nothing is built at
//! registration time: [`ModuleManager::init_module_services`] validates the
//! whole dependency graph first and only then constructs the requested
//! targets plus everything they transitively depend on.

use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_core::{BoxError, BoxedService};
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult, GraphError};
use crate::graph::DependencyGraph;
use crate::module_service::{ModuleLifecycle, ServiceMap, SharedServiceMap};

/// Constructor for a module's service.
pub type ModuleInitFn = Box<dyn Fn() -> Result<BoxedService, BoxError> + Send + Sync>;

/// Boxes a constructor closure as a [`ModuleInitFn`].
///
/// ```rust,ignore
/// engine.register_module("api", init_fn(|| Ok(Arc::new(ApiServer::new()?) as BoxedService)));
/// ```
pub fn init_fn<F>(init: F) -> ModuleInitFn
where
    F: Fn() -> Result<BoxedService, BoxError> + Send + Sync + 'static,
{
    Box::new(init)
}

/// Module name → names of the modules it depends on.
pub type DependencyMap = BTreeMap<String, Vec<String>>;

/// Whether a module may be requested as a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Can be targeted directly.
    #[default]
    Visible,
    /// Only built when another module depends on it.
    Invisible,
}

struct Registration {
    name: String,
    init: ModuleInitFn,
    visibility: Visibility,
}

/// Registry of module constructors.
#[derive(Default)]
pub struct ModuleManager {
    registrations: Vec<Registration>,
}

impl ModuleManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Duplicate names are reported by
    /// [`init_module_services`](Self::init_module_services).
    pub fn register_module(
        &mut self,
        name: impl Into<String>,
        init: ModuleInitFn,
        visibility: Visibility,
    ) {
        let name = name.into();
        trace!(module = %name, ?visibility, "Module registered");
        self.registrations.push(Registration {
            name,
            init,
            visibility,
        });
    }

    /// Returns `true` if a module named `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registration(name).is_some()
    }

    /// Returns `true` if `name` is registered and visible.
    pub fn is_user_visible(&self, name: &str) -> bool {
        self.registration(name)
            .is_some_and(|r| r.visibility == Visibility::Visible)
    }

    /// Names of the visible modules, sorted.
    pub fn user_visible_modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registrations
            .iter()
            .filter(|r| r.visibility == Visibility::Visible)
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn registration(&self, name: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.name == name)
    }

    /// Builds and validates the dependency graph over every registered module.
    pub fn build_graph(&self, dependencies: &DependencyMap) -> Result<DependencyGraph, GraphError> {
        let mut graph = DependencyGraph::new();
        for registration in &self.registrations {
            graph.add_module(&registration.name)?;
        }
        for (module, deps) in dependencies {
            graph.add_dependencies(module, deps)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Constructs the services for `targets` and their transitive dependencies.
    ///
    /// Every constructor runs at most once, dependencies before dependents.
    /// Structural problems are reported before any constructor runs; a
    /// constructor error aborts construction of the remaining modules.
    pub fn init_module_services(
        &self,
        targets: &[String],
        dependencies: &DependencyMap,
    ) -> EngineResult<ServiceMap> {
        let graph = self.build_graph(dependencies)?;
        for target in targets {
            match self.registration(target) {
                None => return Err(GraphError::UnknownModule(target.clone()).into()),
                Some(r) if r.visibility == Visibility::Invisible => {
                    return Err(GraphError::InvisibleTarget(target.clone()).into());
                }
                Some(_) => {}
            }
        }

        let registry: SharedServiceMap = SharedServiceMap::default();
        let mut services = ServiceMap::new();
        for name in graph.transitive_deps(targets) {
            if services.contains_key(&name) {
                continue;
            }
            let Some(registration) = self.registration(&name) else {
                return Err(GraphError::UnknownModule(name).into());
            };

            let inner = (registration.init)().map_err(|source| EngineError::Construction {
                module: name.clone(),
                source,
            })?;
            debug!(module = %name, "Module constructed");

            let deps = graph
                .dependencies(&name)
                .iter()
                .filter_map(|dep| services.get(dep).map(|svc| (dep.clone(), Arc::clone(svc))))
                .collect();
            let wrapped = ModuleLifecycle::wrap(
                name.clone(),
                inner,
                deps,
                graph.dependents(&name),
                Arc::clone(&registry),
            );
            services.insert(name, wrapped);
        }

        *registry.write() = services.clone();
        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conductor_core::{BasicService, Service, ServiceState};

    use super::*;

    fn counted(counter: &Arc<AtomicUsize>) -> ModuleInitFn {
        let counter = Arc::clone(counter);
        init_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(BasicService::idle()))
        })
    }

    fn deps(edges: &[(&str, &[&str])]) -> DependencyMap {
        edges
            .iter()
            .map(|(m, d)| (m.to_string(), d.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shared_dependency_constructed_once() {
        let calls: BTreeMap<&str, Arc<AtomicUsize>> = ["api", "store", "cache", "unused"]
            .into_iter()
            .map(|n| (n, Arc::new(AtomicUsize::new(0))))
            .collect();
        let mut manager = ModuleManager::new();
        for (name, counter) in &calls {
            manager.register_module(*name, counted(counter), Visibility::Visible);
        }

        let map = deps(&[("api", &["store", "cache"]), ("cache", &["store"])]);
        let services = manager
            .init_module_services(&targets(&["api", "cache"]), &map)
            .unwrap();

        assert_eq!(
            services.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["api", "cache", "store"]
        );
        assert!(services.values().all(|s| s.state() == ServiceState::New));
        for name in ["api", "store", "cache"] {
            assert_eq!(calls[name].load(Ordering::SeqCst), 1, "{name}");
        }
        assert_eq!(calls["unused"].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_constructor_failure_stops_construction() {
        let built = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ModuleManager::new();
        manager.register_module(
            "A",
            init_fn(|| Err("database unreachable".into())),
            Visibility::Visible,
        );
        let log = Arc::clone(&built);
        manager.register_module(
            "B",
            init_fn(move || {
                log.lock().unwrap().push("B");
                Ok(Arc::new(BasicService::idle()))
            }),
            Visibility::Visible,
        );

        let err = manager
            .init_module_services(&targets(&["B"]), &deps(&[("B", &["A"])]))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Construction { ref module, .. } if module == "A"));
        assert!(built.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_constructs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module("A", counted(&counter), Visibility::Visible);
        manager.register_module("B", counted(&counter), Visibility::Visible);

        let err = manager
            .init_module_services(&targets(&["A"]), &deps(&[("A", &["B"]), ("B", &["A"])]))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Graph(GraphError::DependencyCycle { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_target_checks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module("server", counted(&counter), Visibility::Visible);
        manager.register_module("internal", counted(&counter), Visibility::Invisible);
        assert!(manager.is_registered("internal"));
        assert!(!manager.is_user_visible("internal"));
        assert_eq!(manager.user_visible_modules(), vec!["server"]);

        let err = manager
            .init_module_services(&targets(&["internal"]), &DependencyMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Graph(GraphError::InvisibleTarget(_))));

        let err = manager
            .init_module_services(&targets(&["ghost"]), &DependencyMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Graph(GraphError::UnknownModule(_))));

        // Invisible modules are still built as dependencies.
        let services = manager
            .init_module_services(&targets(&["server"]), &deps(&[("server", &["internal"])]))
            .unwrap();
        assert!(services.contains_key("internal"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_registration_reported_at_init() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = ModuleManager::new();
        manager.register_module("api", counted(&counter), Visibility::Visible);
        manager.register_module("api", counted(&counter), Visibility::Visible);

        let err = manager
            .init_module_services(&targets(&["api"]), &DependencyMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Graph(GraphError::DuplicateModule(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
