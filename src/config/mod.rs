//! Configuration
//!
//! `ZygoteConfig` is composed from, lowest precedence first: built-in
//! defaults, the global `zygote.toml` in the platform config directory,
//! `./zygote.toml`, and `ZYGOTE_*` environment variables (`__` separates
//! nested keys, so `ZYGOTE_HUB__PORT=4000` sets `hub.port`).

pub mod facade;
pub mod merge;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::runtime::RuntimeSettings;
use crate::supervisor::SupervisorSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "zygote.toml";

/// Platform directories for zygote (`zycelium/zygote`)
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "zycelium", "zygote")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZygoteConfig {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agents implemented as separate executables
    #[serde(default)]
    pub external_agents: Vec<ExternalAgentConfig>,
}

impl ZygoteConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.hub.host.trim().is_empty() {
            return Err(ApiError::ConfigError("hub.host must not be empty".to_string()));
        }
        if self.supervisor.poll_interval_ms == 0 {
            return Err(ApiError::ConfigError(
                "supervisor.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(space) = self.hub.default_spaces.iter().find(|s| s.trim().is_empty()) {
            return Err(ApiError::ConfigError(format!(
                "hub.default_spaces contains an empty name: '{}'",
                space
            )));
        }

        let mut names = HashSet::new();
        for agent in &self.external_agents {
            if agent.name.trim().is_empty() {
                return Err(ApiError::ConfigError("external agent with empty name".to_string()));
            }
            if crate::agents::is_builtin(&agent.name) {
                return Err(ApiError::ConfigError(format!(
                    "external agent '{}' shadows a built-in agent",
                    agent.name
                )));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ApiError::ConfigError(format!(
                    "external agent '{}' declared twice",
                    agent.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// sled database directory; None means `<data dir>/zygote.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Spaces every newly provisioned agent joins
    #[serde(default = "default_spaces")]
    pub default_spaces: Vec<String>,

    /// Built-in agents to launch; None launches all of them
    #[serde(default)]
    pub agents: Option<Vec<String>>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3965
}

fn default_spaces() -> Vec<String> {
    vec!["home".to_string()]
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            default_spaces: default_spaces(),
            agents: None,
        }
    }
}

impl HubConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL agents use to reach this hub
    pub fn url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("zygote.db"))
                .unwrap_or_else(|| PathBuf::from("zygote.db")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_timeout_ms")]
    pub config_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl From<&RuntimeConfig> for RuntimeSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            config_timeout: Duration::from_millis(config.config_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAgentConfig {
    pub name: String,
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}
