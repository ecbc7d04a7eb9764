//! Validation: decide whether a bootstrapped plugin may be initialized.

use std::collections::HashSet;

use async_trait::async_trait;
use conductor_core::CancellationToken;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, SignatureStatus};

/// Plugin API version implemented by this host, `MAJOR << 16 | MINOR`.
pub const HOST_API_VERSION: u32 = 0x0001_0000;

/// Accepts or rejects a single plugin.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Returns `Ok(())` if `plugin` may proceed.
    async fn validate(&self, token: &CancellationToken, plugin: &Plugin) -> PluginResult<()>;
}

/// One synchronous check run by [`StepValidator`].
pub trait ValidationStep: Send + Sync {
    /// Step name for logs.
    fn name(&self) -> &'static str;

    /// Checks `plugin`.
    fn check(&self, plugin: &Plugin) -> PluginResult<()>;
}

/// Runs a list of [`ValidationStep`]s in order, stopping at the first failure.
pub struct StepValidator {
    steps: Vec<Box<dyn ValidationStep>>,
}

impl StepValidator {
    /// Creates a validator without steps.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Signature, backend and API-version checks against [`HOST_API_VERSION`].
    pub fn with_defaults(allow_unsigned: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::for_host(allow_unsigned, HOST_API_VERSION)
    }

    /// The default steps, checking API versions against `host`.
    pub fn for_host(
        allow_unsigned: impl IntoIterator<Item = impl Into<String>>,
        host: u32,
    ) -> Self {
        Self::new()
            .step(SignatureStep::new(allow_unsigned))
            .step(BackendStep)
            .step(ApiVersionStep::new(host))
    }

    /// Appends a step.
    pub fn step(mut self, step: impl ValidationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Names of the configured steps, in order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for StepValidator {
    fn default() -> Self {
        Self::with_defaults(Vec::<String>::new())
    }
}

#[async_trait]
impl Validator for StepValidator {
    async fn validate(&self, token: &CancellationToken, plugin: &Plugin) -> PluginResult<()> {
        for step in &self.steps {
            if token.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            step.check(plugin)?;
        }
        Ok(())
    }
}

// =============================================================================
// Built-in steps
// =============================================================================

/// Rejects unsigned plugins unless their ID (or their parent's) is allow-listed.
#[derive(Debug, Clone, Default)]
pub struct SignatureStep {
    allow_unsigned: HashSet<String>,
}

impl SignatureStep {
    /// Creates the step with an allow list.
    pub fn new(allow_unsigned: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow_unsigned: allow_unsigned.into_iter().map(Into::into).collect(),
        }
    }

    fn is_allowed(&self, plugin: &Plugin) -> bool {
        self.allow_unsigned.contains(&plugin.id)
            || plugin
                .parent
                .as_ref()
                .is_some_and(|parent| self.allow_unsigned.contains(parent))
    }
}

impl ValidationStep for SignatureStep {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn check(&self, plugin: &Plugin) -> PluginResult<()> {
        match plugin.signature {
            SignatureStatus::Internal | SignatureStatus::Valid => Ok(()),
            SignatureStatus::Unsigned if self.is_allowed(plugin) => Ok(()),
            SignatureStatus::Unsigned => Err(PluginError::Unsigned {
                id: plugin.id.clone(),
            }),
        }
    }
}

/// Backend plugins must name their executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStep;

impl ValidationStep for BackendStep {
    fn name(&self) -> &'static str {
        "backend"
    }

    fn check(&self, plugin: &Plugin) -> PluginResult<()> {
        let has_executable = plugin
            .json
            .executable
            .as_deref()
            .is_some_and(|exe| !exe.trim().is_empty());
        if plugin.is_backend() && !has_executable {
            return Err(PluginError::MissingExecutable {
                id: plugin.id.clone(),
            });
        }
        Ok(())
    }
}

/// Checks the manifest's `dependencies.apiVersion` against the host.
///
/// Majors must match and the plugin's minor must not exceed the host's.
/// Plugins that declare no version are accepted.
#[derive(Debug, Clone, Copy)]
pub struct ApiVersionStep {
    host: u32,
}

impl ApiVersionStep {
    /// Checks against a specific host version.
    pub fn new(host: u32) -> Self {
        Self { host }
    }
}

impl Default for ApiVersionStep {
    fn default() -> Self {
        Self::new(HOST_API_VERSION)
    }
}

impl ValidationStep for ApiVersionStep {
    fn name(&self) -> &'static str {
        "api_version"
    }

    fn check(&self, plugin: &Plugin) -> PluginResult<()> {
        let Some(required) = plugin.json.dependencies.api_version.as_deref() else {
            return Ok(());
        };
        let incompatible = || PluginError::IncompatibleApi {
            id: plugin.id.clone(),
            required: required.to_string(),
            host: format_version(self.host),
        };
        let wanted = parse_api_version(required).ok_or_else(incompatible)?;
        let same_major = wanted >> 16 == self.host >> 16;
        let minor_ok = wanted & 0xFFFF <= self.host & 0xFFFF;
        if same_major && minor_ok {
            Ok(())
        } else {
            Err(incompatible())
        }
    }
}

/// Parses `"MAJOR"` or `"MAJOR.MINOR"` into `MAJOR << 16 | MINOR`.
pub fn parse_api_version(raw: &str) -> Option<u32> {
    let mut parts = raw.trim().split('.');
    let major: u16 = parts.next()?.parse().ok()?;
    let minor: u16 = match parts.next() {
        Some(minor) => minor.parse().ok()?,
        None => 0,
    };
    Some(u32::from(major) << 16 | u32::from(minor))
}

fn format_version(version: u32) -> String {
    format!("{}.{}", version >> 16, version & 0xFFFF)
}
