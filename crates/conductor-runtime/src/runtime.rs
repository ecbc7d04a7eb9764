//! The process driver.
//!
//! [`Conductor`] ties configuration, logging, the module engine and the
//! plugin pipeline together and runs the modules until they stop on their
//! own or a shutdown signal arrives.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use conductor_runtime::{Conductor, DependencyMap, Registrar, init_fn};
//!
//! let mut conductor = Conductor::builder()
//!     .config_file("conductor.toml")
//!     .build()?;
//!
//! conductor.engine_mut().register_module("api", init_fn(|| Ok(Arc::new(Api::new()) as BoxedService)));
//! conductor.run(&DependencyMap::new()).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use conductor_core::CancellationToken;
use conductor_plugins::{LocalSource, Loader, RuntimeProvider};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{ConductorConfig, ConfigLoader, ConfigResult};
use crate::engine::ModuleEngine;
use crate::error::{EngineError, EngineResult};
use crate::logging;
use crate::module_manager::DependencyMap;

/// Runs a [`ModuleEngine`] configured from a [`ConductorConfig`].
pub struct Conductor {
    config: ConductorConfig,
    engine: ModuleEngine,
}

impl Conductor {
    /// Creates a driver from the configuration found in the current
    /// directory, falling back to defaults if it cannot be loaded.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load_validated()
            .unwrap_or_else(|e| {
                // Logging is not initialized yet.
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                ConductorConfig::default()
            });
        Self::from_config(&config)
    }

    /// Creates a builder for custom configuration loading.
    pub fn builder() -> ConductorBuilder {
        ConductorBuilder::new()
    }

    /// Creates a driver from `config` and initializes logging from it.
    pub fn from_config(config: &ConductorConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            targets = ?config.modules.targets,
            "Conductor initialized from configuration"
        );

        Self {
            config: config.clone(),
            engine: ModuleEngine::new(config.modules.targets.iter().cloned()),
        }
    }

    /// The configuration this driver was built from.
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// The module engine, for inspecting module states.
    pub fn engine(&self) -> &ModuleEngine {
        &self.engine
    }

    /// The engine, for registering modules before `run`.
    pub fn engine_mut(&mut self) -> &mut ModuleEngine {
        &mut self.engine
    }

    /// The default plugin pipeline for the `plugins` section.
    pub fn plugin_loader(&self, provider: Option<Arc<dyn RuntimeProvider>>) -> Loader {
        Loader::from_config(&self.config.plugins, provider)
    }

    /// The configured plugin directories.
    pub fn plugin_source(&self) -> LocalSource {
        self.config.plugins.source()
    }

    /// Initializes and runs the modules until they stop or Ctrl+C / SIGTERM
    /// is received.
    pub async fn run(&mut self, dependencies: &DependencyMap) -> EngineResult<()> {
        info!("Conductor is running. Press Ctrl+C to stop.");
        self.run_until(dependencies, wait_for_shutdown()).await
    }

    /// Initializes and runs the modules until they stop or `shutdown`
    /// completes.
    ///
    /// On shutdown the modules get `modules.shutdown_timeout_ms` to stop;
    /// after that the run is abandoned with [`EngineError::ShutdownTimeout`].
    pub async fn run_until<F>(&mut self, dependencies: &DependencyMap, shutdown: F) -> EngineResult<()>
    where
        F: Future<Output = ()>,
    {
        self.engine.init(dependencies)?;

        let engine = &self.engine;
        let grace = self.config.modules.shutdown_timeout();
        let token = CancellationToken::new();

        let run = engine.run(&token);
        tokio::pin!(run);
        tokio::pin!(shutdown);

        tokio::select! {
            result = &mut run => {
                match &result {
                    Ok(()) => info!("All modules stopped"),
                    Err(err) => error!(error = %err, kind = err.as_label(), "Modules stopped with an error"),
                }
                result
            }
            () = &mut shutdown => {
                info!(grace = ?grace, "Shutdown requested, stopping modules");
                if engine.service_manager().is_none() {
                    // Nothing to stop; only the run wait needs to end.
                    token.cancel();
                }

                let stop_token = CancellationToken::new();
                let stop = async {
                    let (run_result, stop_result) =
                        tokio::join!(&mut run, engine.shutdown(&stop_token));
                    stop_result?;
                    run_result
                };
                match tokio::time::timeout(grace, stop).await {
                    Ok(result) => result,
                    Err(_) => {
                        token.cancel();
                        error!(
                            grace = ?grace,
                            states = ?engine.service_states(),
                            "Modules did not stop within the shutdown timeout"
                        );
                        Err(EngineError::ShutdownTimeout { grace })
                    }
                }
            }
        }
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes on Ctrl+C or, on Unix, SIGTERM.
///
/// A signal that cannot be listened for is logged and ignored.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to register SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// ConductorBuilder
// =============================================================================

/// Builder for a [`Conductor`] with custom configuration loading.
///
/// ```rust,ignore
/// let conductor = Conductor::builder()
///     .config_file("/etc/conductor/conductor.toml")
///     .profile("production")
///     .targets(["api", "scheduler"])
///     .build()?;
/// ```
pub struct ConductorBuilder {
    config_loader: ConfigLoader,
}

impl ConductorBuilder {
    /// Creates a builder that searches the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables `CONDUCTOR_*` environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Ignores environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a full configuration over every other source.
    pub fn merge(mut self, config: ConductorConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Overrides `modules.targets`.
    pub fn targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        self.config_loader = self.config_loader.set("modules.targets", targets);
        self
    }

    /// Overrides `modules.shutdown_timeout_ms`.
    pub fn shutdown_timeout_ms(mut self, millis: u64) -> Self {
        self.config_loader = self.config_loader.set("modules.shutdown_timeout_ms", millis);
        self
    }

    /// Loads and validates the configuration and creates the driver.
    pub fn build(self) -> ConfigResult<Conductor> {
        let config = self.config_loader.load_validated()?;
        Ok(Conductor::from_config(&config))
    }
}

impl Default for ConductorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use conductor_core::{BasicService, BoxedService, FailureCause, Lifecycle, ServiceState};

    use super::*;
    use crate::engine::Registrar;
    use crate::module_manager::init_fn;

    fn conductor(targets: &[&str], shutdown_timeout_ms: u64) -> Conductor {
        let mut config = ConductorConfig::default();
        config.modules.targets = targets.iter().map(|t| t.to_string()).collect();
        config.modules.shutdown_timeout_ms = shutdown_timeout_ms;
        Conductor::from_config(&config)
    }

    fn idle() -> crate::ModuleInitFn {
        init_fn(|| Ok(Arc::new(BasicService::idle())))
    }

    struct Stubborn;

    #[async_trait]
    impl Lifecycle for Stubborn {
        async fn running(&self, token: CancellationToken) -> Result<(), FailureCause> {
            token.cancelled().await;
            Ok(())
        }

        async fn stopping(&self, _failure: Option<&FailureCause>) -> Result<(), FailureCause> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_until_shutdown_stops_modules() {
        let mut conductor = conductor(&["api"], 5_000);
        conductor.engine_mut().register_module("api", idle());
        conductor.engine_mut().register_module("store", idle());

        let deps = DependencyMap::from([("api".to_string(), vec!["store".to_string()])]);
        conductor
            .run_until(&deps, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();

        let states = conductor.engine().service_states();
        assert_eq!(states.len(), 2);
        assert!(states.values().all(|s| *s == ServiceState::Terminated));
    }

    #[tokio::test]
    async fn test_run_until_without_modules() {
        let mut conductor = conductor(&[], 5_000);
        conductor
            .run_until(&DependencyMap::new(), tokio::time::sleep(Duration::from_millis(5)))
            .await
            .unwrap();
        assert!(conductor.engine().service_map().is_empty());
    }

    #[tokio::test]
    async fn test_module_fault_ends_run() {
        let mut conductor = conductor(&["worker"], 5_000);
        conductor.engine_mut().register_module(
            "worker",
            init_fn(|| {
                let service: BoxedService = Arc::new(BasicService::from_fn(|_token| async {
                    Err(FailureCause::fault("queue closed"))
                }));
                Ok(service)
            }),
        );

        let err = conductor
            .run_until(&DependencyMap::new(), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModuleFailed { ref module, .. } if module == "worker"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout() {
        let mut conductor = conductor(&["stubborn"], 50);
        conductor.engine_mut().register_module(
            "stubborn",
            init_fn(|| Ok(Arc::new(BasicService::new(Stubborn)))),
        );

        let err = conductor
            .run_until(&DependencyMap::new(), tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ShutdownTimeout { grace } if grace == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn test_init_error_is_returned_before_running() {
        let mut conductor = conductor(&["ghost"], 5_000);
        let err = conductor
            .run_until(&DependencyMap::new(), std::future::pending())
            .await
            .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_builder_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let conductor = Conductor::builder()
            .without_env()
            .search_path(dir.path())
            .targets(["api"])
            .shutdown_timeout_ms(1_500)
            .build()
            .unwrap();
        assert_eq!(conductor.config().modules.targets, vec!["api"]);
        assert!(conductor.engine().is_module_enabled("api"));
        assert_eq!(
            conductor.config().modules.shutdown_timeout(),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = Conductor::builder()
            .without_env()
            .search_path(dir.path())
            .targets(["api", "api"])
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, crate::config::ConfigError::DuplicateTarget(_)));
    }

    #[tokio::test]
    async fn test_plugin_loader_uses_plugin_config() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("clock-panel");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.json"),
            r#"{"id": "clock-panel", "type": "panel"}"#,
        )
        .unwrap();

        let mut config = ConductorConfig::default();
        config.plugins.paths = vec![dir.path().to_path_buf()];
        config.plugins.allow_unsigned = vec!["clock-panel".to_string()];
        let conductor = Conductor::from_config(&config);

        let loader = conductor.plugin_loader(None);
        assert_eq!(loader.concurrency(), 4);
        let report = loader
            .load(&CancellationToken::new(), &conductor.plugin_source())
            .await
            .unwrap();
        assert_eq!(report.plugin_ids(), vec!["clock-panel"]);
        assert!(report.is_complete());
    }
}
