//! Merge policy: built-in defaults form the lowest layer.

use crate::config::ZygoteConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with `ZygoteConfig::default()`; later sources override
/// individual keys, tables merge key by key.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&ZygoteConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
