//! Bootstrap: turn one discovered bundle into plugin records.

use std::path::Path;

use async_trait::async_trait;
use conductor_core::CancellationToken;
use tracing::trace;

use crate::error::{PluginError, PluginResult};
use crate::manifest::{FoundBundle, FoundPlugin};
use crate::plugin::{Plugin, SignatureStatus};
use crate::source::{PluginClass, PluginSource};

/// Name of the signature manifest shipped by signed plugins.
pub const SIGNATURE_FILE: &str = "MANIFEST.txt";

/// Builds plugin records from a bundle.
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    /// Returns the primary plugin followed by its children.
    async fn bootstrap(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
        bundle: &FoundBundle,
    ) -> PluginResult<Vec<Plugin>>;
}

/// Default bootstrapper: checks IDs, links parents and children, and records
/// the signature status of the bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestBootstrapper;

impl ManifestBootstrapper {
    /// Creates the bootstrapper.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Bootstrapper for ManifestBootstrapper {
    async fn bootstrap(
        &self,
        token: &CancellationToken,
        source: &dyn PluginSource,
        bundle: &FoundBundle,
    ) -> PluginResult<Vec<Plugin>> {
        if token.is_cancelled() {
            return Err(PluginError::Cancelled);
        }

        let class = source.class();
        validate_id(&bundle.primary.json.id)?;
        for child in &bundle.children {
            validate_id(&child.json.id)?;
            if child.json.id == bundle.primary.json.id {
                return Err(PluginError::InvalidId {
                    id: child.json.id.clone(),
                    reason: "nested plugin reuses its parent's id",
                });
            }
        }

        // Children are covered by the signature of the bundle they ship in.
        let signature = signature_status(class, &bundle.primary.dir).await;

        let mut primary = build(class, &bundle.primary, signature);
        primary.children = bundle.children.iter().map(|c| c.json.id.clone()).collect();

        let mut plugins = Vec::with_capacity(bundle.children.len() + 1);
        plugins.push(primary);
        for child in &bundle.children {
            let mut plugin = build(class, child, signature);
            plugin.parent = Some(bundle.primary.json.id.clone());
            plugins.push(plugin);
        }

        trace!(plugin = %bundle.id(), count = plugins.len(), ?signature, "Bundle bootstrapped");
        Ok(plugins)
    }
}

fn build(class: PluginClass, found: &FoundPlugin, signature: SignatureStatus) -> Plugin {
    Plugin::new(class, found.json.clone(), found.dir.clone()).with_signature(signature)
}

async fn signature_status(class: PluginClass, dir: &Path) -> SignatureStatus {
    if class == PluginClass::Core {
        return SignatureStatus::Internal;
    }
    match tokio::fs::try_exists(dir.join(SIGNATURE_FILE)).await {
        Ok(true) => SignatureStatus::Valid,
        _ => SignatureStatus::Unsigned,
    }
}

fn validate_id(id: &str) -> PluginResult<()> {
    let reason = if id.is_empty() {
        "id is empty"
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        "id may only contain ASCII letters, digits, '-', '_' and '.'"
    } else {
        return Ok(());
    };
    Err(PluginError::InvalidId {
        id: id.to_string(),
        reason,
    })
}
