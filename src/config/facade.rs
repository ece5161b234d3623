//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::ZygoteConfig;
use config::ConfigError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the standard sources, reading `./zygote.toml` from the
    /// current directory.
    pub fn load() -> Result<ZygoteConfig, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        MergeService::load(&cwd)
    }

    /// Load with `local_dir` standing in for the current directory.
    pub fn load_from_dir(local_dir: &Path) -> Result<ZygoteConfig, ConfigError> {
        MergeService::load(local_dir)
    }

    /// Load one explicit file (replacing both file layers) plus environment.
    pub fn load_from_file(path: &Path) -> Result<ZygoteConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    pub fn default() -> ZygoteConfig {
        ZygoteConfig::default()
    }
}
