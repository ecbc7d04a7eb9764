//! Outcome of a [`Loader::load`](crate::Loader::load) call.

use std::fmt;

use crate::error::PluginError;
use crate::plugin::Plugin;

/// Pipeline stage at which an item was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Building plugin records from a bundle.
    Bootstrap,
    /// Running validation steps.
    Validation,
    /// Starting the plugin.
    Initialization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bootstrap => "bootstrap",
            Self::Validation => "validation",
            Self::Initialization => "initialization",
        })
    }
}

/// An item that did not make it through the pipeline.
#[derive(Debug)]
pub struct DroppedItem {
    /// Stage that rejected it.
    pub stage: Stage,
    /// Bundle ID at bootstrap, plugin ID afterwards.
    pub id: String,
    /// Why it was dropped.
    pub error: PluginError,
}

/// Plugins that survived every stage, in discovery order, plus everything
/// that was dropped along the way.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Initialized plugins.
    pub plugins: Vec<Plugin>,
    /// Dropped items, in the order they were dropped.
    pub dropped: Vec<DroppedItem>,
}

impl LoadReport {
    /// IDs of the initialized plugins, in order.
    pub fn plugin_ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id.as_str()).collect()
    }

    /// Items dropped at `stage`.
    pub fn dropped_at(&self, stage: Stage) -> impl Iterator<Item = &DroppedItem> {
        self.dropped.iter().filter(move |d| d.stage == stage)
    }

    /// Returns `true` if nothing was dropped.
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }

    /// Consumes the report, keeping the plugins.
    pub fn into_plugins(self) -> Vec<Plugin> {
        self.plugins
    }

    pub(crate) fn drop_item(&mut self, stage: Stage, id: String, error: PluginError) {
        self.dropped.push(DroppedItem { stage, id, error });
    }
}
