//! # Conductor Plugins
//!
//! A staged pipeline that turns directories of `plugin.json` manifests into
//! initialized plugins:
//!
//! 1. **Discovery** finds bundles in a [`PluginSource`].
//! 2. **Bootstrap** builds [`Plugin`] records and decides signature status.
//! 3. **Validation** rejects plugins that must not run.
//! 4. **Initialization** starts backends through a [`RuntimeProvider`].
//! 5. **Termination** releases a plugin again.
//!
//! Each stage is a trait with a default implementation in [`pipeline`], and
//! [`Loader`] wires them together.
//!
//! ```rust,ignore
//! use conductor_plugins::{LocalSource, Loader, PluginClass, PluginsConfig};
//!
//! let loader = Loader::from_config(&PluginsConfig::default(), None);
//! let source = LocalSource::new(PluginClass::External, ["/var/lib/conductor/plugins"]);
//! let report = loader.load(&token, &source).await?;
//! for dropped in &report.dropped {
//!     eprintln!("{} dropped at {}: {}", dropped.id, dropped.stage, dropped.error);
//! }
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod pipeline;
pub mod plugin;
pub mod report;
pub mod source;

pub use config::PluginsConfig;
pub use error::{LoadError, PluginError, PluginResult};
pub use loader::Loader;
pub use manifest::{FoundBundle, FoundPlugin, PluginJson, PluginType};
pub use plugin::{Plugin, PluginRuntime, PluginState, RuntimeProvider, SignatureStatus};
pub use report::{DroppedItem, LoadReport, Stage};
pub use source::{LocalSource, PluginClass, PluginSource};
