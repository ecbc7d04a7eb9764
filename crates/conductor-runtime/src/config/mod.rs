//! Configuration for the conductor runtime.
//!
//! [`ConductorConfig`] is layered by [`ConfigLoader`] from defaults, files,
//! `CONDUCTOR_*` environment variables and programmatic merges, then checked
//! by [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConductorConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ModulesConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
