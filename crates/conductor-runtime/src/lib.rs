//! # Conductor Runtime
//!
//! Module orchestration for a process composed of named, dependent services:
//!
//! - modules are registered by name with a constructor ([`Registrar`]);
//! - [`ModuleEngine::init`] validates the dependency graph and constructs the
//!   requested targets plus everything they depend on;
//! - [`ModuleEngine::run`] starts them as one supervised group and reports
//!   the first genuine failure, treating an operator stop as success;
//! - [`ModuleEngine::shutdown`] stops the group in reverse dependency order.
//!
//! [`Conductor`] adds configuration, logging, signal handling and the
//! plugin pipeline from `conductor-plugins`.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use conductor_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conductor = Conductor::builder().targets(["api"]).build()?;
//!     let engine = conductor.engine_mut();
//!     engine.register_invisible_module("store", init_fn(|| Ok(Arc::new(Store::open()?) as BoxedService)));
//!     engine.register_module("api", init_fn(|| Ok(Arc::new(Api::new()) as BoxedService)));
//!
//!     let deps = DependencyMap::from([("api".into(), vec!["store".into()])]);
//!     conductor.run(&deps).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod listener;
pub mod logging;
pub mod module_manager;
pub mod module_service;
pub mod runtime;
pub mod service_manager;

pub use config::{ConductorConfig, ConfigLoader, LoggingConfig, ModulesConfig};
pub use engine::{ModuleEngine, Registrar};
pub use error::{ConfigError, ConfigResult, EngineError, EngineResult, GraphError};
pub use graph::DependencyGraph;
pub use listener::FailureTable;
pub use logging::{LoggingBuilder, SpanEvents};
pub use module_manager::{DependencyMap, ModuleInitFn, ModuleManager, Visibility, init_fn};
pub use module_service::ServiceMap;
pub use runtime::{Conductor, ConductorBuilder, wait_for_shutdown};
pub use service_manager::{ManagerListener, ServiceManager, StopHandle};

pub use tracing;

/// Common imports for composing and running modules.
pub mod prelude {
    pub use conductor_core::prelude::*;
    pub use tracing::{debug, error, info, trace, warn};

    pub use crate::{
        Conductor, DependencyMap, EngineError, EngineResult, ModuleEngine, Registrar, init_fn,
    };
}
