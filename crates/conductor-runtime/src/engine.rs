//! The module engine: registration, `init`, `run` and `shutdown`.
//!
//! ```rust,ignore
//! let mut engine = ModuleEngine::new(["api"]);
//! engine.register_module("store", init_fn(|| Ok(Arc::new(Store::new()?) as BoxedService)));
//! engine.register_module("api", init_fn(|| Ok(Arc::new(Api::new()) as BoxedService)));
//!
//! let deps = DependencyMap::from([("api".into(), vec!["store".into()])]);
//! engine.init(&deps)?;
//!
//! let token = CancellationToken::new();
//! engine.run(&token).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_core::{CancellationToken, ServiceState};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::listener::{FailureTable, ModuleListener};
use crate::module_manager::{DependencyMap, ModuleInitFn, ModuleManager, Visibility};
use crate::module_service::ServiceMap;
use crate::service_manager::ServiceManager;

/// Registration half of the engine, handed to the code that composes modules.
pub trait Registrar {
    /// Registers a module that may be targeted directly.
    fn register_module(&mut self, name: &str, init: ModuleInitFn);

    /// Registers a module that is only built as a dependency.
    fn register_invisible_module(&mut self, name: &str, init: ModuleInitFn);
}

/// Builds the requested modules and supervises them as one group.
pub struct ModuleEngine {
    targets: Vec<String>,
    modules: ModuleManager,
    service_map: ServiceMap,
    service_manager: Option<ServiceManager>,
    failures: Arc<FailureTable>,
}

impl ModuleEngine {
    /// Creates an engine that will activate `targets`.
    pub fn new(targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            modules: ModuleManager::new(),
            service_map: ServiceMap::new(),
            service_manager: None,
            failures: Arc::new(FailureTable::new()),
        }
    }

    /// The requested targets, as given.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// The module registry.
    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    /// Builds the dependency graph and constructs the services for the
    /// targets and everything they depend on.
    ///
    /// # Errors
    ///
    /// [`EngineError::Graph`] for a malformed registry or dependency map and
    /// [`EngineError::Construction`] when a constructor fails. In both cases
    /// the engine is left without services.
    pub fn init(&mut self, dependencies: &DependencyMap) -> EngineResult<()> {
        debug!(targets = ?self.targets, "Initializing module manager");
        self.service_map.clear();
        self.service_manager = None;
        self.failures.clear();

        self.service_map = self
            .modules
            .init_module_services(&self.targets, dependencies)?;

        if self.service_map.is_empty() {
            return Ok(());
        }

        let services = self
            .service_map
            .iter()
            .map(|(name, service)| (name.clone(), Arc::clone(service)));
        self.service_manager = Some(ServiceManager::new(services).map_err(EngineError::Service)?);
        debug!(modules = self.service_map.len(), "Module services initialized");
        Ok(())
    }

    /// Starts every module and waits until the group has stopped.
    ///
    /// Returns `Ok(())` when every module stopped normally or only with an
    /// operator stop; otherwise the first genuine fault, as
    /// [`EngineError::ModuleFailed`]. Without modules this waits for `token`
    /// and returns `Ok(())`.
    ///
    /// Cancelling `token` also cancels the modules; the wait then ends with
    /// [`EngineError::Wait`].
    pub async fn run(&self, token: &CancellationToken) -> EngineResult<()> {
        let Some(manager) = &self.service_manager else {
            warn!("No modules registered...");
            token.cancelled().await;
            return Ok(());
        };

        manager.add_listener(Arc::new(ModuleListener::new(
            Arc::clone(&self.failures),
            manager.stop_handle(),
        )));

        debug!("Starting module service manager");
        manager.start_async(token).map_err(EngineError::Service)?;
        manager.await_stopped(token).await.map_err(EngineError::Wait)?;

        // The listener logged every failure already; report the first real one.
        match self.failures.first_fault() {
            Some((module, cause)) => Err(EngineError::ModuleFailed { module, cause }),
            None => Ok(()),
        }
    }

    /// Stops every module and waits for all of them to reach a terminal state.
    ///
    /// Returns immediately when `init` produced no modules. A cancelled
    /// `token` ends the wait with [`EngineError::Wait`]; the modules keep
    /// stopping.
    pub async fn shutdown(&self, token: &CancellationToken) -> EngineResult<()> {
        let Some(manager) = &self.service_manager else {
            debug!("No modules registered, nothing to stop...");
            return Ok(());
        };
        manager.stop_async();
        info!("Awaiting services to be stopped...");
        manager.await_stopped(token).await.map_err(EngineError::Wait)
    }

    /// Returns `true` if `name` is one of the requested targets.
    ///
    /// Modules pulled in only as dependencies are not "enabled".
    pub fn is_module_enabled(&self, name: &str) -> bool {
        self.targets.iter().any(|target| target == name)
    }

    /// Services built by the last `init`.
    pub fn service_map(&self) -> &ServiceMap {
        &self.service_map
    }

    /// Service manager built by the last `init`, if any module was built.
    pub fn service_manager(&self) -> Option<&ServiceManager> {
        self.service_manager.as_ref()
    }

    /// Current state of every built module.
    pub fn service_states(&self) -> BTreeMap<String, ServiceState> {
        self.service_map
            .iter()
            .map(|(name, service)| (name.clone(), service.state()))
            .collect()
    }

    /// Module failures recorded during the current run, oldest first.
    pub fn failures(&self) -> &FailureTable {
        &self.failures
    }
}

impl Registrar for ModuleEngine {
    fn register_module(&mut self, name: &str, init: ModuleInitFn) {
        self.modules.register_module(name, init, Visibility::Visible);
    }

    fn register_invisible_module(&mut self, name: &str, init: ModuleInitFn) {
        self.modules.register_module(name, init, Visibility::Invisible);
    }
}
