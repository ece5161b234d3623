//! Built-in agents
//!
//! Each one is an ordinary [`AgentRuntime`] that the binary runs in its own
//! process (`zygote agent <name>`).

pub mod hello;
pub mod log_to_file;

use crate::error::ApiError;
use crate::runtime::AgentRuntime;

pub const BUILTIN_AGENTS: &[&str] = &[hello::NAME, log_to_file::NAME];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_AGENTS.contains(&name)
}

/// Runtime for the built-in agent `name`
pub fn build(name: &str) -> Result<AgentRuntime, ApiError> {
    match name {
        hello::NAME => Ok(hello::runtime()?),
        log_to_file::NAME => Ok(log_to_file::runtime()),
        other => Err(ApiError::UnknownAgent(other.to_string())),
    }
}
