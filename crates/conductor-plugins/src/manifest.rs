//! The `plugin.json` manifest and the raw records produced by discovery.
//!
//! ```json
//! {
//!   "id": "acme-clock-panel",
//!   "name": "Clock",
//!   "type": "panel",
//!   "info": { "version": "1.4.0" },
//!   "backend": false,
//!   "dependencies": { "apiVersion": "1.0", "plugins": [] }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// File name of a plugin manifest.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Kind of plugin declared in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Data source plugin.
    Datasource,
    /// Visualisation panel.
    Panel,
    /// Application bundling other plugins.
    App,
    /// Renderer.
    Renderer,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Datasource => "datasource",
            Self::Panel => "panel",
            Self::App => "app",
            Self::Renderer => "renderer",
        })
    }
}

/// Descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin version string.
    #[serde(default)]
    pub version: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Requirements the plugin places on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDependencies {
    /// Host API version the plugin was built against, `"MAJOR.MINOR"`.
    #[serde(default)]
    pub api_version: Option<String>,
    /// IDs of plugins this one needs.
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Parsed `plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginJson {
    /// Unique plugin ID.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Plugin kind.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Descriptive metadata.
    #[serde(default)]
    pub info: PluginInfo,
    /// Whether the plugin runs a backend process.
    #[serde(default)]
    pub backend: bool,
    /// Backend executable, relative to the plugin directory.
    #[serde(default)]
    pub executable: Option<String>,
    /// Host and plugin requirements.
    #[serde(default)]
    pub dependencies: PluginDependencies,
}

impl PluginJson {
    /// Creates a minimal manifest.
    pub fn new(id: impl Into<String>, plugin_type: PluginType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            plugin_type,
            info: PluginInfo::default(),
            backend: false,
            executable: None,
            dependencies: PluginDependencies::default(),
        }
    }

    /// Parses a manifest; `path` is only used for error reporting.
    pub fn from_slice(bytes: &[u8], path: &Path) -> PluginResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PluginError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reads and parses `dir/plugin.json`.
    pub fn read_from_dir(dir: &Path) -> PluginResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path).map_err(|source| PluginError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_slice(&bytes, &path)
    }
}

/// A manifest together with the directory it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundPlugin {
    /// Parsed manifest.
    pub json: PluginJson,
    /// Directory containing `plugin.json`.
    pub dir: PathBuf,
}

impl FoundPlugin {
    /// Creates a record.
    pub fn new(json: PluginJson, dir: impl Into<PathBuf>) -> Self {
        Self {
            json,
            dir: dir.into(),
        }
    }
}

/// A primary plugin plus the plugins nested below its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundBundle {
    /// The outermost plugin.
    pub primary: FoundPlugin,
    /// Nested plugins, in path order.
    pub children: Vec<FoundPlugin>,
}

impl FoundBundle {
    /// Creates a bundle without children.
    pub fn new(primary: FoundPlugin) -> Self {
        Self {
            primary,
            children: Vec::new(),
        }
    }

    /// Adds a nested plugin.
    pub fn with_child(mut self, child: FoundPlugin) -> Self {
        self.children.push(child);
        self
    }

    /// ID of the primary plugin.
    pub fn id(&self) -> &str {
        &self.primary.json.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let raw = br#"{
            "id": "acme-sql",
            "name": "Acme SQL",
            "type": "datasource",
            "info": { "version": "2.1.0" },
            "backend": true,
            "executable": "gpx_acme_sql",
            "dependencies": { "apiVersion": "1.0", "plugins": ["acme-app"] }
        }"#;
        let json = PluginJson::from_slice(raw, Path::new("plugin.json")).unwrap();
        assert_eq!(json.id, "acme-sql");
        assert_eq!(json.plugin_type, PluginType::Datasource);
        assert!(json.backend);
        assert_eq!(json.executable.as_deref(), Some("gpx_acme_sql"));
        assert_eq!(json.dependencies.api_version.as_deref(), Some("1.0"));
        assert_eq!(json.dependencies.plugins, vec!["acme-app".to_string()]);
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let json =
            PluginJson::from_slice(br#"{"id":"clock","type":"panel"}"#, Path::new("p")).unwrap();
        assert!(!json.backend);
        assert!(json.info.version.is_empty());
        assert!(json.dependencies.api_version.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = PluginJson::from_slice(br#"{"id":"x","type":"widget"}"#, Path::new("x/plugin.json"))
            .unwrap_err();
        assert_eq!(err.as_label(), "invalid_manifest");
        assert!(err.to_string().contains("x/plugin.json"));
    }
}
