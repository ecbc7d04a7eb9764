//! [`Loader`] drives a plugin source through the pipeline.
//!
//! ```text
//! discover ──► bootstrap ──► validate ──► initialize      (load)
//!                                          terminate      (unload)
//! ```
//!
//! Discovery is the only stage whose failure aborts the load. Every later
//! stage works per item: an item that fails, panics or is cancelled is
//! recorded in [`LoadReport::dropped`] and the remaining items carry on.
//! Validation and initialization run up to `concurrency` items at once while
//! keeping the input order in their output.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use tracing::{Instrument, debug, debug_span, error, info, warn};

use conductor_core::CancellationToken;

use crate::config::PluginsConfig;
use crate::error::{LoadError, PluginError, PluginResult};
use crate::manifest::FoundBundle;
use crate::pipeline::{
    Bootstrapper, Discoverer, FsDiscoverer, HOST_API_VERSION, Initializer, ManifestBootstrapper,
    RuntimeInitializer, RuntimeTerminator, StepValidator, Terminator, Validator, catch_panic,
};
use crate::plugin::{Plugin, PluginState, RuntimeProvider};
use crate::report::{LoadReport, Stage};
use crate::source::PluginSource;

/// Runs the plugin pipeline with pluggable stage implementations.
pub struct Loader {
    discoverer: Arc<dyn Discoverer>,
    bootstrapper: Arc<dyn Bootstrapper>,
    validator: Arc<dyn Validator>,
    initializer: Arc<dyn Initializer>,
    terminator: Arc<dyn Terminator>,
    concurrency: usize,
}

impl Loader {
    /// Creates a loader from explicit stages.
    pub fn new(
        discoverer: impl Discoverer + 'static,
        bootstrapper: impl Bootstrapper + 'static,
        validator: impl Validator + 'static,
        initializer: impl Initializer + 'static,
        terminator: impl Terminator + 'static,
    ) -> Self {
        Self {
            discoverer: Arc::new(discoverer),
            bootstrapper: Arc::new(bootstrapper),
            validator: Arc::new(validator),
            initializer: Arc::new(initializer),
            terminator: Arc::new(terminator),
            concurrency: 1,
        }
    }

    /// Creates the default pipeline described by `config`.
    ///
    /// A malformed `api_version` falls back to [`HOST_API_VERSION`]; the
    /// runtime rejects such configurations before they get here.
    pub fn from_config(config: &PluginsConfig, provider: Option<Arc<dyn RuntimeProvider>>) -> Self {
        let host = config.host_api_version().unwrap_or(HOST_API_VERSION);
        Self::new(
            FsDiscoverer::new(),
            ManifestBootstrapper::new(),
            StepValidator::for_host(config.allow_unsigned.iter().cloned(), host),
            RuntimeInitializer::new(provider),
            RuntimeTerminator::new(),
        )
        .with_concurrency(config.concurrency)
    }

    /// Sets how many items validation and initialization process at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Configured concurrency.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Loads every plugin from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Discovery`] if the source cannot be scanned.
    /// Failures of individual plugins are reported in the returned
    /// [`LoadReport`] instead.
    pub async fn load(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
    ) -> Result<LoadReport, LoadError> {
        let span = debug_span!("plugin_loader", source = %source.class());
        self.load_source(token, source).instrument(span).await
    }

    /// Terminates one loaded plugin and returns its terminated record.
    pub async fn unload(&self, token: &CancellationToken, plugin: &Plugin) -> PluginResult<Plugin> {
        let result = self.terminator.terminate(token, plugin).await;
        match &result {
            Ok(_) => debug!(plugin = %plugin.id, "Plugin unloaded"),
            Err(err) => warn!(plugin = %plugin.id, error = %err, "Failed to unload plugin"),
        }
        result
    }

    async fn load_source(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
    ) -> Result<LoadReport, LoadError> {
        let started = Instant::now();
        let class = source.class();

        let bundles = self
            .discoverer
            .discover(token, source)
            .await
            .map_err(|err| {
                error!(error = %err, "Plugin discovery failed");
                LoadError::Discovery { class, source: err }
            })?;
        debug!(bundles = bundles.len(), "Plugins discovered");

        let mut report = LoadReport::default();
        let bootstrapped = self.bootstrap(token, source, &bundles, &mut report).await;

        let validator = &*self.validator;
        let validated = self
            .run_stage(Stage::Validation, token, bootstrapped, &mut report, |mut plugin| {
                async move {
                    validator.validate(token, &plugin).await?;
                    plugin.state = PluginState::Validated;
                    Ok(plugin)
                }
            })
            .await;

        let initializer = &*self.initializer;
        let initialized = self
            .run_stage(Stage::Initialization, token, validated, &mut report, |plugin| {
                initializer.initialize(token, plugin)
            })
            .await;
        report.plugins = initialized;

        if report.plugins.is_empty() {
            info!(
                dropped = report.dropped.len(),
                duration = ?started.elapsed(),
                "Plugin source loaded, though no plugins were found"
            );
        } else {
            let mut ids = report.plugin_ids();
            ids.sort_unstable();
            info!(
                plugins = %ids.join(", "),
                dropped = report.dropped.len(),
                duration = ?started.elapsed(),
                "Plugin source loaded"
            );
        }
        Ok(report)
    }

    async fn bootstrap(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
        bundles: &[FoundBundle],
        report: &mut LoadReport,
    ) -> Vec<Plugin> {
        let mut plugins = Vec::new();
        for bundle in bundles {
            let id = bundle.id().to_string();
            if token.is_cancelled() {
                record_drop(report, Stage::Bootstrap, id, PluginError::Cancelled);
                continue;
            }
            match catch_panic(self.bootstrapper.bootstrap(token, source, bundle)).await {
                Ok(Ok(bootstrapped)) => plugins.extend(bootstrapped),
                Ok(Err(err)) => record_drop(report, Stage::Bootstrap, id, err),
                Err(message) => {
                    let err = PluginError::Panicked {
                        id: id.clone(),
                        message,
                    };
                    record_drop(report, Stage::Bootstrap, id, err);
                }
            }
        }
        plugins
    }

    async fn run_stage<F, Fut>(
        &self,
        stage: Stage,
        token: &CancellationToken,
        items: Vec<Plugin>,
        report: &mut LoadReport,
        work: F,
    ) -> Vec<Plugin>
    where
        F: Fn(Plugin) -> Fut,
        Fut: Future<Output = PluginResult<Plugin>>,
    {
        let outcomes: Vec<(String, PluginResult<Plugin>)> = stream::iter(items)
            .map(|plugin| {
                let id = plugin.id.clone();
                // Checked lazily, as each item enters the window.
                let pending = (!token.is_cancelled()).then(|| work(plugin));
                async move {
                    let result = match pending {
                        None => Err(PluginError::Cancelled),
                        Some(fut) => catch_panic(fut).await.unwrap_or_else(|message| {
                            Err(PluginError::Panicked {
                                id: id.clone(),
                                message,
                            })
                        }),
                    };
                    (id, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut survivors = Vec::with_capacity(outcomes.len());
        for (id, result) in outcomes {
            match result {
                Ok(plugin) => survivors.push(plugin),
                Err(err) => record_drop(report, stage, id, err),
            }
        }
        survivors
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::from_config(&PluginsConfig::default(), None)
    }
}

fn record_drop(report: &mut LoadReport, stage: Stage, id: String, err: PluginError) {
    if matches!(err, PluginError::Cancelled) {
        debug!(%stage, plugin = %id, "Plugin skipped, load cancelled");
    } else {
        warn!(%stage, plugin = %id, error = %err, "Plugin dropped from load");
    }
    report.drop_item(stage, id, err);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::manifest::{FoundPlugin, PluginJson, PluginType};
    use crate::source::{LocalSource, PluginClass};

    struct StaticDiscoverer(Vec<FoundBundle>);

    #[async_trait]
    impl Discoverer for StaticDiscoverer {
        async fn discover(
            &self,
            _token: &CancellationToken,
            _source: &dyn PluginSource,
        ) -> PluginResult<Vec<FoundBundle>> {
            Ok(self.0.clone())
        }
    }

    /// Sleeps longer for earlier plugins, panics on "boom", rejects `reject`.
    #[derive(Default)]
    struct ScriptedValidator {
        reject: HashSet<String>,
        stagger: bool,
    }

    #[async_trait]
    impl Validator for ScriptedValidator {
        async fn validate(&self, _token: &CancellationToken, plugin: &Plugin) -> PluginResult<()> {
            if self.stagger {
                let n: u64 = plugin.id.trim_start_matches('p').parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(60 - n * 10)).await;
            }
            if plugin.id == "boom" {
                panic!("validator exploded");
            }
            if self.reject.contains(&plugin.id) {
                return Err(PluginError::other(format!("{} rejected", plugin.id)));
            }
            Ok(())
        }
    }

    /// Cancels the load token while initializing `trigger`.
    struct CancellingInitializer {
        token: CancellationToken,
        trigger: &'static str,
    }

    #[async_trait]
    impl Initializer for CancellingInitializer {
        async fn initialize(
            &self,
            _token: &CancellationToken,
            mut plugin: Plugin,
        ) -> PluginResult<Plugin> {
            if plugin.id == self.trigger {
                self.token.cancel();
            }
            plugin.state = PluginState::Initialized;
            Ok(plugin)
        }
    }

    fn bundle(id: &str) -> FoundBundle {
        FoundBundle::new(FoundPlugin::new(
            PluginJson::new(id, PluginType::Panel),
            PathBuf::from("/plugins").join(id),
        ))
    }

    fn bundles(ids: &[&str]) -> Vec<FoundBundle> {
        ids.iter().map(|id| bundle(id)).collect()
    }

    fn core_source() -> LocalSource {
        LocalSource::new(PluginClass::Core, Vec::<PathBuf>::new())
    }

    fn loader(found: Vec<FoundBundle>, validator: impl Validator + 'static) -> Loader {
        Loader::new(
            StaticDiscoverer(found),
            ManifestBootstrapper::new(),
            validator,
            RuntimeInitializer::new(None),
            RuntimeTerminator::new(),
        )
    }

    #[tokio::test]
    async fn test_bootstrap_failure_drops_only_that_bundle() {
        let loader = loader(bundles(&["alpha", "bad id", "gamma"]), StepValidator::default());
        let report = loader
            .load(&CancellationToken::new(), &core_source())
            .await
            .unwrap();

        assert_eq!(report.plugin_ids(), vec!["alpha", "gamma"]);
        assert!(report.plugins.iter().all(|p| p.state == PluginState::Initialized));
        let dropped: Vec<_> = report.dropped_at(Stage::Bootstrap).collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, "bad id");
        assert_eq!(dropped[0].error.as_label(), "invalid_id");
    }

    #[tokio::test]
    async fn test_validation_drops_unsigned_plugins() {
        let found = vec![
            bundle("trusted-app").with_child(FoundPlugin::new(
                PluginJson::new("trusted-ds", PluginType::Datasource),
                "/plugins/trusted-app/ds",
            )),
            bundle("stranger"),
        ];
        let loader = loader(found, StepValidator::with_defaults(["trusted-app"]));
        let source = LocalSource::new(PluginClass::External, Vec::<PathBuf>::new());
        let report = loader.load(&CancellationToken::new(), &source).await.unwrap();

        assert_eq!(report.plugin_ids(), vec!["trusted-app", "trusted-ds"]);
        let dropped: Vec<_> = report.dropped_at(Stage::Validation).collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, "stranger");
        assert_eq!(dropped[0].error.as_label(), "unsigned");
    }

    #[tokio::test]
    async fn test_order_preserved_under_concurrency() {
        let ids = ["p0", "p1", "p2", "p3", "p4", "p5"];
        let validator = ScriptedValidator {
            reject: HashSet::from(["p3".to_string()]),
            stagger: true,
        };
        let loader = loader(bundles(&ids), validator).with_concurrency(4);
        let report = loader
            .load(&CancellationToken::new(), &core_source())
            .await
            .unwrap();

        assert_eq!(report.plugin_ids(), vec!["p0", "p1", "p2", "p4", "p5"]);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].stage, Stage::Validation);
    }

    #[tokio::test]
    async fn test_panicking_stage_is_isolated() {
        let loader = loader(bundles(&["alpha", "boom", "gamma"]), ScriptedValidator::default())
            .with_concurrency(2);
        let report = loader
            .load(&CancellationToken::new(), &core_source())
            .await
            .unwrap();

        assert_eq!(report.plugin_ids(), vec!["alpha", "gamma"]);
        assert!(matches!(
            &report.dropped[0].error,
            PluginError::Panicked { id, message } if id == "boom" && message == "validator exploded"
        ));
    }

    #[tokio::test]
    async fn test_initialization_failure_drops_only_that_plugin() {
        let mut backend = PluginJson::new("sql", PluginType::Datasource);
        backend.backend = true;
        backend.executable = Some("gpx_sql".to_string());
        let found = vec![
            bundle("alpha"),
            FoundBundle::new(FoundPlugin::new(backend, "/plugins/sql")),
            bundle("gamma"),
        ];
        let loader = loader(found, StepValidator::default()).with_concurrency(3);
        let report = loader
            .load(&CancellationToken::new(), &core_source())
            .await
            .unwrap();

        assert_eq!(report.plugin_ids(), vec!["alpha", "gamma"]);
        assert_eq!(report.dropped.len(), 1);
        let dropped = &report.dropped[0];
        assert_eq!(dropped.stage, Stage::Initialization);
        assert_eq!(dropped.id, "sql");
        assert_eq!(dropped.error.as_label(), "no_runtime_provider");
    }

    #[tokio::test]
    async fn test_nested_plugin_cannot_reuse_an_id() {
        let tmp = tempfile::tempdir().unwrap();
        for (dir, id) in [("a", "a"), ("a/nested", "b"), ("b", "b")] {
            let dir = tmp.path().join(dir);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("plugin.json"),
                format!(r#"{{"id":"{id}","type":"panel"}}"#),
            )
            .unwrap();
        }

        let source = LocalSource::new(PluginClass::Core, [tmp.path()]);
        let report = Loader::default()
            .load(&CancellationToken::new(), &source)
            .await
            .unwrap();
        assert_eq!(report.plugin_ids(), vec!["a", "b"]);
        assert_eq!(report.plugins[1].dir, tmp.path().join("a/nested"));
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalSource::new(PluginClass::External, [tmp.path().join("missing")]);
        let err = Loader::default()
            .load(&CancellationToken::new(), &source)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Discovery { class: PluginClass::External, source: PluginError::SourceNotFound(_) }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_completed_items() {
        let token = CancellationToken::new();
        let loader = Loader::new(
            StaticDiscoverer(bundles(&["p0", "p1", "p2", "p3"])),
            ManifestBootstrapper::new(),
            StepValidator::default(),
            CancellingInitializer {
                token: token.clone(),
                trigger: "p1",
            },
            RuntimeTerminator::new(),
        );
        let report = loader.load(&token, &core_source()).await.unwrap();

        assert_eq!(report.plugin_ids(), vec!["p0", "p1"]);
        let cancelled: Vec<&str> = report
            .dropped_at(Stage::Initialization)
            .filter(|d| matches!(d.error, PluginError::Cancelled))
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(cancelled, vec!["p2", "p3"]);
    }

    #[tokio::test]
    async fn test_empty_source_yields_empty_report() {
        let tmp = tempfile::tempdir().unwrap();
        let source = LocalSource::new(PluginClass::External, [tmp.path()]);
        let report = Loader::default()
            .load(&CancellationToken::new(), &source)
            .await
            .unwrap();
        assert!(report.plugins.is_empty());
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_unload() {
        let loader = loader(bundles(&["alpha"]), StepValidator::default());
        let token = CancellationToken::new();
        let report = loader.load(&token, &core_source()).await.unwrap();
        let plugin = &report.plugins[0];

        let terminated = loader.unload(&token, plugin).await.unwrap();
        assert_eq!(terminated.state, PluginState::Terminated);

        let err = loader.unload(&token, &terminated).await.unwrap_err();
        assert!(matches!(err, PluginError::NotInitialized { .. }));

        // The pipeline is still usable afterwards.
        let again = loader.load(&token, &core_source()).await.unwrap();
        assert_eq!(again.plugin_ids(), vec!["alpha"]);
    }
}
