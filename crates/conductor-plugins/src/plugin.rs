//! The plugin record carried through the pipeline, and the runtime seam used
//! to start backend plugins.
//!
//! ```text
//! bootstrap ──► Bootstrapped ──validate──► Validated ──initialize──► Initialized
//!                                                                        │
//!                                                         terminate ──► Terminated
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{BoxError, CancellationToken};

use crate::manifest::{PluginJson, PluginType};
use crate::source::PluginClass;

/// Pipeline state of a [`Plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Built from a discovered manifest.
    Bootstrapped,
    /// Passed every validation step.
    Validated,
    /// Ready to serve.
    Initialized,
    /// Unloaded.
    Terminated,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bootstrapped => "bootstrapped",
            Self::Validated => "validated",
            Self::Initialized => "initialized",
            Self::Terminated => "terminated",
        })
    }
}

/// Outcome of the signature check performed at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureStatus {
    /// Core plugin, trusted by construction.
    Internal,
    /// A signature manifest is present.
    Valid,
    /// No signature.
    Unsigned,
}

/// A running backend for a plugin.
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    /// Stops the backend.
    async fn stop(&self) -> Result<(), BoxError>;
}

/// Starts backends for backend plugins.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Starts the backend for `plugin`.
    async fn start(
        &self,
        token: &CancellationToken,
        plugin: &Plugin,
    ) -> Result<Arc<dyn PluginRuntime>, BoxError>;
}

/// A plugin moving through the pipeline.
#[derive(Clone)]
pub struct Plugin {
    /// Unique ID from the manifest.
    pub id: String,
    /// Class of the source it was loaded from.
    pub class: PluginClass,
    /// Parsed manifest.
    pub json: PluginJson,
    /// Directory containing the manifest.
    pub dir: PathBuf,
    /// ID of the enclosing plugin for nested plugins.
    pub parent: Option<String>,
    /// IDs of nested plugins.
    pub children: Vec<String>,
    /// Signature status decided at bootstrap.
    pub signature: SignatureStatus,
    /// Pipeline state.
    pub state: PluginState,
    runtime: Option<Arc<dyn PluginRuntime>>,
}

impl Plugin {
    /// Creates a freshly bootstrapped, unsigned plugin.
    pub fn new(class: PluginClass, json: PluginJson, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: json.id.clone(),
            class,
            json,
            dir: dir.into(),
            parent: None,
            children: Vec::new(),
            signature: SignatureStatus::Unsigned,
            state: PluginState::Bootstrapped,
            runtime: None,
        }
    }

    /// Sets the signature status.
    pub fn with_signature(mut self, signature: SignatureStatus) -> Self {
        self.signature = signature;
        self
    }

    /// Plugin kind.
    pub fn plugin_type(&self) -> PluginType {
        self.json.plugin_type
    }

    /// Version string from the manifest.
    pub fn version(&self) -> &str {
        &self.json.info.version
    }

    /// Returns `true` if the plugin runs a backend process.
    pub fn is_backend(&self) -> bool {
        self.json.backend
    }

    /// Returns `true` for core plugins.
    pub fn is_core(&self) -> bool {
        self.class == PluginClass::Core
    }

    /// The running backend, once initialized.
    pub fn runtime(&self) -> Option<&Arc<dyn PluginRuntime>> {
        self.runtime.as_ref()
    }

    /// Attaches a running backend.
    pub fn set_runtime(&mut self, runtime: Arc<dyn PluginRuntime>) {
        self.runtime = Some(runtime);
    }

    /// Detaches the running backend.
    pub fn take_runtime(&mut self) -> Option<Arc<dyn PluginRuntime>> {
        self.runtime.take()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("type", &self.json.plugin_type)
            .field("dir", &self.dir)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("signature", &self.signature)
            .field("state", &self.state)
            .field("has_runtime", &self.runtime.is_some())
            .finish()
    }
}
