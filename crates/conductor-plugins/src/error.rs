//! Error types for the plugin pipeline.
//!
//! Almost every failure here is *per item*: the loader records it against the
//! offending plugin and keeps going. Only a failing discovery aborts a load,
//! see [`LoadError`].

use std::path::PathBuf;

use conductor_core::BoxError;
use thiserror::Error;

use crate::plugin::PluginState;
use crate::source::PluginClass;

/// Errors produced by a single pipeline stage for a single item.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A configured source path does not exist.
    #[error("plugin source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Reading the filesystem failed.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `plugin.json` could not be parsed.
    #[error("invalid plugin manifest {}: {reason}", .path.display())]
    InvalidManifest {
        /// Manifest path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The declared plugin ID is malformed.
    #[error("invalid plugin id '{id}': {reason}")]
    InvalidId {
        /// Offending ID.
        id: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The plugin is unsigned and not allow-listed.
    #[error("plugin '{id}' is unsigned and not in the allow list")]
    Unsigned {
        /// Plugin ID.
        id: String,
    },

    /// A backend plugin declares no executable.
    #[error("backend plugin '{id}' does not declare an executable")]
    MissingExecutable {
        /// Plugin ID.
        id: String,
    },

    /// The plugin targets an API the host cannot serve.
    #[error("plugin '{id}' requires API {required}, host provides {host}")]
    IncompatibleApi {
        /// Plugin ID.
        id: String,
        /// Version declared in the manifest.
        required: String,
        /// Version implemented by the host.
        host: String,
    },

    /// A backend plugin needs a runtime but none was configured.
    #[error("backend plugin '{id}' cannot start: no runtime provider configured")]
    NoRuntimeProvider {
        /// Plugin ID.
        id: String,
    },

    /// The plugin runtime failed to start or stop.
    #[error("plugin '{id}' runtime error: {source}")]
    Runtime {
        /// Plugin ID.
        id: String,
        /// Error reported by the runtime.
        #[source]
        source: BoxError,
    },

    /// The plugin is not in a state that allows the operation.
    #[error("plugin '{id}' is not initialized (state: {state})")]
    NotInitialized {
        /// Plugin ID.
        id: String,
        /// Current state.
        state: PluginState,
    },

    /// A stage panicked while processing the plugin.
    #[error("plugin '{id}' stage panicked: {message}")]
    Panicked {
        /// Plugin ID.
        id: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The load was cancelled before the item was processed.
    #[error("operation cancelled")]
    Cancelled,

    /// Error reported by a custom stage implementation.
    #[error("{0}")]
    Other(BoxError),
}

impl PluginError {
    /// Wraps an arbitrary error from a custom stage.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "source_not_found",
            Self::Io { .. } => "io",
            Self::InvalidManifest { .. } => "invalid_manifest",
            Self::InvalidId { .. } => "invalid_id",
            Self::Unsigned { .. } => "unsigned",
            Self::MissingExecutable { .. } => "missing_executable",
            Self::IncompatibleApi { .. } => "incompatible_api",
            Self::NoRuntimeProvider { .. } => "no_runtime_provider",
            Self::Runtime { .. } => "runtime",
            Self::NotInitialized { .. } => "not_initialized",
            Self::Panicked { .. } => "panicked",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }
}

/// Result type for single-item pipeline operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that abort a whole [`Loader::load`](crate::Loader::load) call.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source could not be scanned.
    #[error("failed to discover plugins from {class} source: {source}")]
    Discovery {
        /// Class of the source being loaded.
        class: PluginClass,
        /// Underlying discovery error.
        #[source]
        source: PluginError,
    },
}
