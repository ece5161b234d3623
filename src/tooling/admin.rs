//! Administrative storage operations behind `zygote agents|spaces|token`
//!
//! Each returns the text the CLI prints.

use crate::bootstrap::ensure_space;
use crate::error::{ApiError, StorageError};
use crate::store::{AgentRecord, SpaceRecord, Storage};
use comfy_table::Table;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(format: &str) -> Result<Self, ApiError> {
        match format {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid output format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }
}

fn agent_named(storage: &dyn Storage, name: &str) -> Result<AgentRecord, ApiError> {
    storage
        .get_agent_by_name(name)?
        .ok_or_else(|| StorageError::not_found("agent", name).into())
}

fn space_named(storage: &dyn Storage, name: &str) -> Result<SpaceRecord, ApiError> {
    storage
        .get_space_by_name(name)?
        .ok_or_else(|| StorageError::not_found("space", name).into())
}

fn to_json(value: serde_json::Value) -> Result<String, ApiError> {
    serde_json::to_string_pretty(&value).map_err(|e| ApiError::ConfigError(e.to_string()))
}

pub fn list_agents(storage: &dyn Storage, format: OutputFormat) -> Result<String, ApiError> {
    let mut rows = Vec::new();
    for agent in storage.list_agents()? {
        let spaces: Vec<String> = storage.agent_spaces(&agent.uuid)?.into_iter().map(|s| s.name).collect();
        let active_tokens = storage.list_tokens(&agent.uuid)?.iter().filter(|t| !t.revoked).count();
        rows.push((agent, spaces, active_tokens));
    }

    if format == OutputFormat::Json {
        let agents: Vec<_> = rows
            .iter()
            .map(|(agent, spaces, tokens)| {
                json!({
                    "uuid": agent.uuid,
                    "name": agent.name,
                    "spaces": spaces,
                    "active_tokens": tokens,
                    "config": agent.meta.get("config"),
                    "updated_at": agent.updated_at,
                })
            })
            .collect();
        return to_json(json!(agents));
    }

    if rows.is_empty() {
        return Ok("No agents.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "UUID", "Spaces", "Active Tokens", "Updated"]);
    for (agent, spaces, tokens) in &rows {
        table.add_row(vec![
            agent.name.clone(),
            agent.uuid.to_string(),
            spaces.join(", "),
            tokens.to_string(),
            agent.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    Ok(table.to_string())
}

pub fn list_spaces(storage: &dyn Storage, format: OutputFormat) -> Result<String, ApiError> {
    let mut rows = Vec::new();
    for space in storage.list_spaces()? {
        let members: Vec<String> = storage.space_agents(&space.uuid)?.into_iter().map(|a| a.name).collect();
        rows.push((space, members));
    }

    if format == OutputFormat::Json {
        let spaces: Vec<_> = rows
            .iter()
            .map(|(space, members)| json!({"uuid": space.uuid, "name": space.name, "agents": members}))
            .collect();
        return to_json(json!(spaces));
    }

    if rows.is_empty() {
        return Ok("No spaces.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "UUID", "Agents"]);
    for (space, members) in &rows {
        table.add_row(vec![space.name.clone(), space.uuid.to_string(), members.join(", ")]);
    }
    Ok(table.to_string())
}

/// Join `agent` to `space`, creating the space if needed. Takes effect on
/// the agent's next connection.
pub fn join_space(storage: &dyn Storage, agent: &str, space: &str) -> Result<String, ApiError> {
    let agent = agent_named(storage, agent)?;
    let space = ensure_space(storage, space)?;
    storage.join_space(&agent.uuid, &space.uuid)?;
    Ok(format!("Agent '{}' joined space '{}'", agent.name, space.name))
}

pub fn leave_space(storage: &dyn Storage, agent: &str, space: &str) -> Result<String, ApiError> {
    let agent = agent_named(storage, agent)?;
    let space = space_named(storage, space)?;
    storage.leave_space(&agent.uuid, &space.uuid)?;
    Ok(format!("Agent '{}' left space '{}'", agent.name, space.name))
}

pub fn mint_token(storage: &dyn Storage, agent: &str) -> Result<String, ApiError> {
    let agent = agent_named(storage, agent)?;
    Ok(storage.mint_token(&agent.uuid)?.token)
}

pub fn revoke_token(storage: &dyn Storage, token: &str) -> Result<String, ApiError> {
    storage.revoke_token(token)?;
    Ok("Token revoked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use crate::types::Data;

    #[test]
    fn test_join_creates_space_and_lists() {
        let storage = MemoryStorage::new();
        storage.create_agent("weather", Data::new()).unwrap();

        join_space(&storage, "weather", "home").unwrap();
        let listing = list_spaces(&storage, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(parsed[0]["name"], "home");
        assert_eq!(parsed[0]["agents"], json!(["weather"]));

        let text = list_agents(&storage, OutputFormat::Text).unwrap();
        assert!(text.contains("weather"));
        assert!(text.contains("home"));
    }

    #[test]
    fn test_leave_unknown_space_fails() {
        let storage = MemoryStorage::new();
        storage.create_agent("weather", Data::new()).unwrap();
        assert!(matches!(
            leave_space(&storage, "weather", "garden"),
            Err(ApiError::StorageError(StorageError::NotFound { entity: "space", .. }))
        ));
    }

    #[test]
    fn test_mint_and_revoke() {
        let storage = MemoryStorage::new();
        storage.create_agent("weather", Data::new()).unwrap();
        let token = mint_token(&storage, "weather").unwrap();
        assert!(storage.get_agent_by_token(&token).unwrap().is_some());

        revoke_token(&storage, &token).unwrap();
        assert!(storage.get_agent_by_token(&token).unwrap().is_none());
        assert!(mint_token(&storage, "nobody").is_err());
    }

    #[test]
    fn test_empty_listings() {
        let storage = MemoryStorage::new();
        assert_eq!(list_agents(&storage, OutputFormat::Text).unwrap(), "No agents.");
        assert_eq!(list_spaces(&storage, OutputFormat::Json).unwrap(), "[]");
        assert!(OutputFormat::parse("yaml").is_err());
    }
}
