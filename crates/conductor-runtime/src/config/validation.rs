//! Configuration validation utilities.

use std::collections::HashSet;

use conductor_plugins::PluginsConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConductorConfig, LogOutput, LoggingConfig, ModulesConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ConductorConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_modules_config(&config.modules)?;
    validate_plugins_config(&config.plugins)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output = \"file\" requires logging.file_path",
        ));
    }

    // Keys become `target=level` directives.
    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(['=', ',', ' ']) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }
    Ok(())
}

fn validate_modules_config(modules: &ModulesConfig) -> ConfigResult<()> {
    if modules.shutdown_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Shutdown timeout must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for target in &modules.targets {
        if target.trim().is_empty() {
            return Err(ConfigError::validation("Module target names cannot be empty"));
        }
        if !seen.insert(target.as_str()) {
            return Err(ConfigError::DuplicateTarget(target.clone()));
        }
    }
    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.concurrency == 0 {
        return Err(ConfigError::validation(
            "Plugin concurrency must be at least 1",
        ));
    }

    if let Some(raw) = &plugins.api_version
        && plugins.host_api_version().is_none()
    {
        return Err(ConfigError::validation(format!(
            "Invalid plugin API version: {raw:?}, expected MAJOR or MAJOR.MINOR"
        )));
    }
    Ok(())
}
