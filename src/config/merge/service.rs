//! MergeService: orchestrates sources, applies merge policy, deserializes to ZygoteConfig.

use crate::config::sources::{environment, global_file, local_file};
use crate::config::ZygoteConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::Path;

use super::merge_policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> local file -> environment (highest).
    pub fn load(local_dir: &Path) -> Result<ZygoteConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = local_file::add_to_builder(builder, local_dir)?;
        let builder = environment::add_to_builder(builder)?;
        Self::finish(builder)
    }

    /// Defaults, one explicit file, then environment.
    pub fn load_from_file(path: &Path) -> Result<ZygoteConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = builder.add_source(File::from(path));
        let builder = environment::add_to_builder(builder)?;
        Self::finish(builder)
    }

    pub(crate) fn finish(builder: ConfigBuilder<DefaultState>) -> Result<ZygoteConfig, ConfigError> {
        builder.build()?.try_deserialize()
    }
}
