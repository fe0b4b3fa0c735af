//! Configuration parsing, environment overrides and validation.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

use std::path::Path;

use tracing::warn;

use crate::common::error::ConfigError;

pub use parser::load_config;
pub use types::*;
pub use validate::validate_config;

/// Load a configuration file, apply environment overrides and validate it.
///
/// Validation warnings are logged; validation errors are returned.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = env::apply_env_overrides(load_config(path)?);

    for warning in validate_config(&config)? {
        warn!("Config: {}", warning);
    }

    Ok(config)
}
