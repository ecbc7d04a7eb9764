//! # Conductor
//!
//! Runs a process as a set of named modules with declared dependencies, and
//! loads plugins through a staged, failure-isolating pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   init    ┌───────────────┐  start/stop  ┌──────────────────────┐
//! │ Conductor  │──────────▶│ ModuleEngine  │─────────────▶│ ServiceManager       │
//! │ (config,   │           │ (graph, ctor  │              │  ├─ module "store"   │
//! │  signals)  │           │  memoization) │◀─ failures ──│  ├─ module "api"     │
//! └────────────┘           └───────────────┘              │  └─ ...              │
//!       │                                                 └──────────────────────┘
//!       │ plugin_loader
//!       ▼
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │ discover │──▶│ bootstrap │──▶│ validate │──▶│ initialize │──▶ LoadReport
//! └──────────┘   └───────────┘   └──────────┘   └────────────┘
//! ```
//!
//! - **core**: the `Service` contract and `BasicService`
//! - **runtime**: module registration, `init`/`run`/`shutdown`, config, logging
//! - **plugins**: the `load`/`unload` pipeline and its default stages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use conductor::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conductor = Conductor::new();
//!     conductor
//!         .engine_mut()
//!         .register_module("api", init_fn(|| Ok(Arc::new(BasicService::idle()) as BoxedService)));
//!
//!     let report = conductor
//!         .plugin_loader(None)
//!         .load(&CancellationToken::new(), &conductor.plugin_source())
//!         .await?;
//!     info!(plugins = ?report.plugin_ids(), "Plugins ready");
//!
//!     conductor.run(&DependencyMap::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `conductor.toml` configuration files
//! - `yaml-config`: `conductor.yaml` configuration files
//! - `json-log`: JSON log output

pub use conductor_core as core;
pub use conductor_plugins as plugins;
pub use conductor_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Service contract
    pub use conductor_core::prelude::*;

    // Orchestration
    pub use conductor_runtime::{
        Conductor, DependencyMap, EngineError, EngineResult, ModuleEngine, Registrar, init_fn,
    };

    // Plugins
    pub use conductor_plugins::{
        LoadReport, Loader, LocalSource, Plugin, PluginClass, PluginError, PluginRuntime,
        RuntimeProvider,
    };

    // Logging macros
    pub use conductor_runtime::tracing::{debug, error, info, trace, warn};
}
