//! Termination: release an initialized plugin.

use async_trait::async_trait;
use conductor_core::CancellationToken;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginState};

/// Terminates a single plugin.
#[async_trait]
pub trait Terminator: Send + Sync {
    /// Returns the plugin in its terminated state.
    async fn terminate(&self, token: &CancellationToken, plugin: &Plugin) -> PluginResult<Plugin>;
}

/// Stops the plugin's backend, if any, and marks it terminated.
///
/// Only `Initialized` plugins can be terminated; anything else yields
/// [`PluginError::NotInitialized`] and leaves the caller's record untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeTerminator;

impl RuntimeTerminator {
    /// Creates the terminator.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Terminator for RuntimeTerminator {
    async fn terminate(&self, token: &CancellationToken, plugin: &Plugin) -> PluginResult<Plugin> {
        if token.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        if plugin.state != PluginState::Initialized {
            return Err(PluginError::NotInitialized {
                id: plugin.id.clone(),
                state: plugin.state,
            });
        }

        let mut out = plugin.clone();
        if let Some(runtime) = out.take_runtime() {
            runtime.stop().await.map_err(|source| PluginError::Runtime {
                id: plugin.id.clone(),
                source,
            })?;
            debug!(plugin = %plugin.id, "Plugin backend stopped");
        }
        out.state = PluginState::Terminated;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::manifest::{PluginJson, PluginType};
    use crate::pipeline::initialization::tests::CountingProvider;
    use crate::pipeline::{Initializer, RuntimeInitializer};
    use crate::source::PluginClass;

    #[tokio::test]
    async fn test_terminate_initialized_backend() {
        let provider = Arc::new(CountingProvider::default());
        let mut json = PluginJson::new("sql", PluginType::Datasource);
        json.backend = true;
        json.executable = Some("gpx_sql".to_string());
        let token = CancellationToken::new();
        let plugin = RuntimeInitializer::new(Some(provider.clone()))
            .initialize(&token, Plugin::new(PluginClass::External, json, "/p"))
            .await
            .unwrap();

        let out = RuntimeTerminator::new().terminate(&token, &plugin).await.unwrap();
        assert_eq!(out.state, PluginState::Terminated);
        assert!(out.runtime().is_none());
        assert_eq!(provider.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.state, PluginState::Initialized);
    }

    #[tokio::test]
    async fn test_terminate_rejects_uninitialized() {
        let plugin = Plugin::new(
            PluginClass::External,
            PluginJson::new("clock", PluginType::Panel),
            "/p",
        );
        let err = RuntimeTerminator::new()
            .terminate(&CancellationToken::new(), &plugin)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::NotInitialized { state: PluginState::Bootstrapped, .. }
        ));
    }
}
