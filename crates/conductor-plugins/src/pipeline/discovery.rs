//! Discovery: turn a source into bundles of raw manifests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conductor_core::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::manifest::{FoundBundle, FoundPlugin, MANIFEST_FILE, PluginJson};
use crate::source::PluginSource;

/// Finds plugin bundles in a source.
///
/// Unlike every later stage, a discovery error aborts the whole load.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Returns the bundles found in `source`.
    async fn discover(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
    ) -> PluginResult<Vec<FoundBundle>>;
}

/// Scans source directories for `plugin.json` files.
///
/// A manifest nested below another manifest's directory becomes a child of
/// that bundle. Hidden directories and `node_modules` are not entered.
/// Unparseable manifests are skipped with a warning. IDs are unique across
/// the whole scan: a bundle whose primary ID was already found is skipped,
/// and so is a nested plugin reusing any earlier ID. A missing source path
/// is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDiscoverer;

impl FsDiscoverer {
    /// Creates the discoverer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Discoverer for FsDiscoverer {
    async fn discover(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
    ) -> PluginResult<Vec<FoundBundle>> {
        let paths = source.paths();
        let token = token.clone();
        tokio::task::spawn_blocking(move || scan(&paths, &token))
            .await
            .map_err(PluginError::other)?
    }
}

fn scan(roots: &[PathBuf], token: &CancellationToken) -> PluginResult<Vec<FoundBundle>> {
    let mut bundles: Vec<FoundBundle> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for root in roots {
        if token.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        if !root.exists() {
            return Err(PluginError::SourceNotFound(root.clone()));
        }

        let mut dirs = Vec::new();
        collect_manifest_dirs(root, &mut dirs)?;
        // Component-wise ordering puts every directory right before its descendants.
        dirs.sort();

        for mut bundle in group(dirs) {
            if !seen.insert(bundle.id().to_string()) {
                skip_duplicate(&bundle.primary);
                continue;
            }
            bundle.children.retain(|child| {
                let fresh = seen.insert(child.json.id.clone());
                if !fresh {
                    skip_duplicate(child);
                }
                fresh
            });
            bundles.push(bundle);
        }
    }

    debug!(bundles = bundles.len(), "Plugin discovery finished");
    Ok(bundles)
}

fn skip_duplicate(plugin: &FoundPlugin) {
    warn!(
        plugin = %plugin.json.id,
        dir = %plugin.dir.display(),
        "Skipping duplicate plugin"
    );
}

fn group(dirs: Vec<PathBuf>) -> Vec<FoundBundle> {
    let mut bundles: Vec<FoundBundle> = Vec::new();
    // Root directory of the current bundle, and its index when its manifest parsed.
    let mut current: Option<(PathBuf, Option<usize>)> = None;

    for dir in dirs {
        let nested = current
            .as_ref()
            .is_some_and(|(root, _)| dir.starts_with(root));
        let manifest = read_manifest(&dir);

        if nested {
            match (current.as_ref().and_then(|(_, idx)| *idx), manifest) {
                (Some(idx), Some(json)) => bundles[idx].children.push(FoundPlugin::new(json, dir)),
                (None, _) => debug!(dir = %dir.display(), "Skipping plugin nested in an invalid plugin"),
                (Some(_), None) => {}
            }
            continue;
        }

        let idx = manifest.map(|json| {
            bundles.push(FoundBundle::new(FoundPlugin::new(json, dir.clone())));
            bundles.len() - 1
        });
        current = Some((dir, idx));
    }

    bundles
}

fn read_manifest(dir: &Path) -> Option<PluginJson> {
    match PluginJson::read_from_dir(dir) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Skipping invalid plugin manifest");
            None
        }
    }
}

fn collect_manifest_dirs(dir: &Path, out: &mut Vec<PathBuf>) -> PluginResult<()> {
    let io_err = |source| PluginError::Io {
        path: dir.to_path_buf(),
        source,
    };

    if dir.join(MANIFEST_FILE).is_file() {
        out.push(dir.to_path_buf());
    }

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        collect_manifest_dirs(&entry.path(), out)?;
    }
    Ok(())
}
