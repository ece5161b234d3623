//! Agent discovery and provisioning
//!
//! At hub startup every known agent gets an agent record, a usable token and
//! a supervised process. New agents join the configured default spaces;
//! existing agents keep whatever membership they have.

use crate::agents;
use crate::config::ZygoteConfig;
use crate::error::{ApiError, StorageError};
use crate::store::{AgentRecord, SpaceRecord, Storage};
use crate::supervisor::{ProcessSpec, Supervisor};
use crate::types::Data;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Token handed to agent processes
pub const AGENT_TOKEN_ENV: &str = "ZYGOTE_AGENT_TOKEN";
/// Hub URL handed to external agent processes
pub const HUB_URL_ENV: &str = "ZYGOTE_HUB_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSource {
    /// Runs as `<zygote exe> agent <name>`
    Builtin,
    External { program: PathBuf, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAgent {
    pub name: String,
    pub source: AgentSource,
}

impl DiscoveredAgent {
    /// Command line that runs this agent against `hub_url`
    pub fn process_spec(&self, exe: &Path, hub_url: &str, token: &str) -> ProcessSpec {
        let spec = match &self.source {
            AgentSource::Builtin => ProcessSpec::new(exe).args(["agent", self.name.as_str(), "--url", hub_url]),
            AgentSource::External { program, args } => ProcessSpec::new(program)
                .args(args.iter().cloned())
                .env(HUB_URL_ENV, hub_url),
        };
        spec.env(AGENT_TOKEN_ENV, token)
    }
}

/// Built-in agents (optionally filtered by `hub.agents`) followed by
/// configured external agents
pub fn discover(config: &ZygoteConfig) -> Vec<DiscoveredAgent> {
    let allowed = config.hub.agents.as_ref();
    if let Some(allowed) = allowed {
        for name in allowed.iter().filter(|n| !agents::is_builtin(n)) {
            warn!(agent = %name, "Ignoring unknown built-in agent in hub.agents");
        }
    }

    let builtins = agents::BUILTIN_AGENTS
        .iter()
        .filter(|name| allowed.map_or(true, |list| list.iter().any(|n| n.as_str() == **name)))
        .map(|name| DiscoveredAgent {
            name: name.to_string(),
            source: AgentSource::Builtin,
        });
    let external = config.external_agents.iter().map(|agent| DiscoveredAgent {
        name: agent.name.clone(),
        source: AgentSource::External {
            program: agent.program.clone(),
            args: agent.args.clone(),
        },
    });
    builtins.chain(external).collect()
}

/// Outcome of provisioning one agent
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub agent: AgentRecord,
    pub token: String,
    pub created: bool,
}

/// Ensure the agent record, its default memberships and a live token
pub fn provision(storage: &dyn Storage, name: &str, default_spaces: &[String]) -> Result<Provisioned, StorageError> {
    let (agent, created) = match storage.get_agent_by_name(name)? {
        Some(agent) => (agent, false),
        None => {
            let agent = storage.create_agent(name, Data::new())?;
            for space_name in default_spaces {
                let space = ensure_space(storage, space_name)?;
                storage.join_space(&agent.uuid, &space.uuid)?;
            }
            info!(agent = %name, spaces = ?default_spaces, "Provisioned new agent");
            (agent, true)
        }
    };

    let token = match storage.list_tokens(&agent.uuid)?.into_iter().find(|t| !t.revoked) {
        Some(existing) => existing.token,
        None => {
            debug!(agent = %name, "Minting agent token");
            storage.mint_token(&agent.uuid)?.token
        }
    };

    Ok(Provisioned { agent, token, created })
}

/// Fetch a space by name, creating it when missing
pub fn ensure_space(storage: &dyn Storage, name: &str) -> Result<SpaceRecord, StorageError> {
    if let Some(space) = storage.get_space_by_name(name)? {
        return Ok(space);
    }
    match storage.create_space(name, Data::new()) {
        Ok(space) => Ok(space),
        Err(StorageError::Conflict { .. }) => storage
            .get_space_by_name(name)?
            .ok_or_else(|| StorageError::not_found("space", name)),
        Err(e) => Err(e),
    }
}

/// Provision every discovered agent and register it with `supervisor`
/// (not started). Returns the registered names.
pub async fn bootstrap(
    config: &ZygoteConfig,
    storage: &dyn Storage,
    supervisor: &Supervisor,
    exe: &Path,
) -> Result<Vec<String>, ApiError> {
    let hub_url = config.hub.url();
    let mut registered = Vec::new();
    for agent in discover(config) {
        let provisioned = provision(storage, &agent.name, &config.hub.default_spaces)?;
        let spec = agent.process_spec(exe, &hub_url, &provisioned.token);
        supervisor.add_process(&agent.name, spec, false).await?;
        registered.push(agent.name);
    }
    info!(agents = ?registered, "Agents registered with supervisor");
    Ok(registered)
}
