//! Serde configuration for the default plugin pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::{HOST_API_VERSION, parse_api_version};
use crate::source::{LocalSource, PluginClass};

fn default_concurrency() -> usize {
    4
}

/// `plugins` section of the runtime configuration.
///
/// ```yaml
/// plugins:
///   paths: ["/var/lib/conductor/plugins"]
///   class: external
///   allow_unsigned: ["acme-dev-panel"]
///   concurrency: 8
///   api_version: "1.0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for plugins.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Trust class of those directories.
    #[serde(default)]
    pub class: PluginClass,
    /// Unsigned plugin IDs that are accepted anyway.
    #[serde(default)]
    pub allow_unsigned: Vec<String>,
    /// Maximum number of plugins validated or initialized at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Host API version plugins are checked against, `"MAJOR.MINOR"`.
    /// Defaults to [`HOST_API_VERSION`].
    #[serde(default)]
    pub api_version: Option<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            class: PluginClass::default(),
            allow_unsigned: Vec::new(),
            concurrency: default_concurrency(),
            api_version: None,
        }
    }
}

impl PluginsConfig {
    /// The configured directories as a source.
    pub fn source(&self) -> LocalSource {
        LocalSource::new(self.class, self.paths.iter().cloned())
    }

    /// The host API version, packed as `MAJOR << 16 | MINOR`.
    ///
    /// Returns `None` if `api_version` is set but malformed.
    pub fn host_api_version(&self) -> Option<u32> {
        match self.api_version.as_deref() {
            Some(raw) => parse_api_version(raw),
            None => Some(HOST_API_VERSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_api_version() {
        let mut config = PluginsConfig::default();
        assert_eq!(config.host_api_version(), Some(HOST_API_VERSION));

        config.api_version = Some("2.3".to_string());
        assert_eq!(config.host_api_version(), Some(0x0002_0003));

        config.api_version = Some("two".to_string());
        assert_eq!(config.host_api_version(), None);
    }
}
