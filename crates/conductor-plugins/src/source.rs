//! Where plugins come from.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Trust class of a plugin source.
///
/// `Core` plugins ship with the host and are implicitly trusted; `Bundled`
/// and `External` plugins must carry a signature or be allow-listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginClass {
    /// Built into the host.
    Core,
    /// Shipped alongside the host.
    Bundled,
    /// Installed by the operator.
    #[default]
    External,
}

impl PluginClass {
    /// Returns the lowercase class name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Bundled => "bundled",
            Self::External => "external",
        }
    }
}

impl fmt::Display for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location plugins are loaded from.
pub trait PluginSource: Send + Sync {
    /// Trust class shared by every plugin in this source.
    fn class(&self) -> PluginClass;

    /// Root directories to scan.
    fn paths(&self) -> Vec<PathBuf>;
}

/// A source backed by a fixed list of local directories.
#[derive(Debug, Clone)]
pub struct LocalSource {
    class: PluginClass,
    paths: Vec<PathBuf>,
}

impl LocalSource {
    /// Creates a source of `class` scanning `paths`.
    pub fn new(class: PluginClass, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            class,
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl PluginSource for LocalSource {
    fn class(&self) -> PluginClass {
        self.class
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}
