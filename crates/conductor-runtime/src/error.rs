//! Runtime error types.

use std::time::Duration;

use conductor_core::{BoxError, FailureCause, ServiceError};
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Structural problems in the module registry or dependency map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The same name was registered twice.
    #[error("module '{0}' is registered more than once")]
    DuplicateModule(String),

    /// A target or dependency map key names no registered module.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// A module depends on something that is not registered.
    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownDependency {
        /// The depending module.
        module: String,
        /// The missing dependency.
        dependency: String,
    },

    /// An invisible module was requested as a target.
    #[error("module '{0}' is internal and cannot be targeted directly")]
    InvisibleTarget(String),

    /// The dependency map contains a cycle.
    #[error("module dependency cycle detected among: {}", .modules.join(", "))]
    DependencyCycle {
        /// Modules that are part of, or blocked by, a cycle.
        modules: Vec<String>,
    },
}

/// Errors returned by [`ModuleEngine`](crate::ModuleEngine) and
/// [`Conductor`](crate::Conductor).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The registry or dependency map is malformed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A module constructor returned an error.
    #[error("failed to construct module '{module}': {source}")]
    Construction {
        /// Module being constructed.
        module: String,
        /// Constructor error.
        #[source]
        source: BoxError,
    },

    /// A module failed while running.
    #[error("module '{module}' failed: {cause}")]
    ModuleFailed {
        /// First module that failed.
        module: String,
        /// Its failure cause.
        #[source]
        cause: FailureCause,
    },

    /// The service manager rejected an operation.
    #[error("service manager error: {0}")]
    Service(#[source] ServiceError),

    /// Waiting for modules to stop did not complete.
    #[error("failed waiting for modules: {0}")]
    Wait(#[source] ServiceError),

    /// Modules did not stop within the shutdown grace period.
    #[error("modules did not stop within {grace:?}")]
    ShutdownTimeout {
        /// Configured grace period.
        grace: Duration,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Returns the failure cause for [`EngineError::ModuleFailed`].
    pub fn failure_cause(&self) -> Option<&FailureCause> {
        match self {
            Self::ModuleFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Returns `true` for errors detected before any module was constructed
    /// or started.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Graph(_))
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Graph(_) => "graph",
            Self::Construction { .. } => "construction",
            Self::ModuleFailed { .. } => "module_failed",
            Self::Service(_) => "service",
            Self::Wait(_) => "wait",
            Self::ShutdownTimeout { .. } => "shutdown_timeout",
            Self::Config(_) => "config",
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
