//! Initialization: make a validated plugin ready to serve.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::CancellationToken;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginState, RuntimeProvider};

/// Initializes a single validated plugin.
#[async_trait]
pub trait Initializer: Send + Sync {
    /// Returns the initialized plugin.
    async fn initialize(&self, token: &CancellationToken, plugin: Plugin) -> PluginResult<Plugin>;
}

/// Starts a backend for backend plugins through a [`RuntimeProvider`];
/// frontend-only plugins are simply marked initialized.
#[derive(Clone, Default)]
pub struct RuntimeInitializer {
    provider: Option<Arc<dyn RuntimeProvider>>,
}

impl RuntimeInitializer {
    /// Creates an initializer. Without a provider, backend plugins fail.
    pub fn new(provider: Option<Arc<dyn RuntimeProvider>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Initializer for RuntimeInitializer {
    async fn initialize(
        &self,
        token: &CancellationToken,
        mut plugin: Plugin,
    ) -> PluginResult<Plugin> {
        if token.is_cancelled() {
            return Err(PluginError::Cancelled);
        }

        if plugin.is_backend() {
            let provider = self
                .provider
                .as_ref()
                .ok_or_else(|| PluginError::NoRuntimeProvider {
                    id: plugin.id.clone(),
                })?;
            let runtime = provider
                .start(token, &plugin)
                .await
                .map_err(|source| PluginError::Runtime {
                    id: plugin.id.clone(),
                    source,
                })?;
            plugin.set_runtime(runtime);
            debug!(plugin = %plugin.id, "Plugin backend started");
        }

        plugin.state = PluginState::Initialized;
        Ok(plugin)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conductor_core::BoxError;

    use super::*;
    use crate::manifest::{PluginJson, PluginType};
    use crate::plugin::PluginRuntime;
    use crate::source::PluginClass;

    /// Provider that counts starts and hands out runtimes counting stops.
    #[derive(Default)]
    pub(crate) struct CountingProvider {
        pub(crate) started: AtomicUsize,
        pub(crate) stopped: Arc<AtomicUsize>,
    }

    pub(crate) struct CountingRuntime(Arc<AtomicUsize>);

    #[async_trait]
    impl PluginRuntime for CountingRuntime {
        async fn stop(&self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RuntimeProvider for CountingProvider {
        async fn start(
            &self,
            _token: &CancellationToken,
            plugin: &Plugin,
        ) -> Result<Arc<dyn PluginRuntime>, BoxError> {
            if plugin.id.starts_with("crash") {
                return Err("executable exited with status 1".into());
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingRuntime(Arc::clone(&self.stopped))))
        }
    }

    fn backend(id: &str) -> Plugin {
        let mut json = PluginJson::new(id, PluginType::Datasource);
        json.backend = true;
        json.executable = Some(format!("gpx_{id}"));
        Plugin::new(PluginClass::External, json, "/plugins")
    }

    #[tokio::test]
    async fn test_frontend_plugin_needs_no_provider() {
        let plugin = Plugin::new(
            PluginClass::External,
            PluginJson::new("clock", PluginType::Panel),
            "/plugins/clock",
        );
        let out = RuntimeInitializer::new(None)
            .initialize(&CancellationToken::new(), plugin)
            .await
            .unwrap();
        assert_eq!(out.state, PluginState::Initialized);
        assert!(out.runtime().is_none());
    }

    #[tokio::test]
    async fn test_backend_plugin_started_through_provider() {
        let provider = Arc::new(CountingProvider::default());
        let init = RuntimeInitializer::new(Some(provider.clone()));

        let out = init
            .initialize(&CancellationToken::new(), backend("sql"))
            .await
            .unwrap();
        assert!(out.runtime().is_some());
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);

        let err = init
            .initialize(&CancellationToken::new(), backend("crashy"))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime");
    }

    #[tokio::test]
    async fn test_backend_plugin_without_provider_fails() {
        let err = RuntimeInitializer::new(None)
            .initialize(&CancellationToken::new(), backend("sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NoRuntimeProvider { ref id } if id == "sql"));
    }
}
