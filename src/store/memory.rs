//! In-memory storage.

use super::{check_name, AgentRecord, AuthTokenRecord, FrameRecord, SpaceRecord, Storage};
use crate::error::StorageError;
use crate::types::{AgentId, Data, SpaceId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct State {
    agents: HashMap<AgentId, AgentRecord>,
    spaces: HashMap<SpaceId, SpaceRecord>,
    memberships: BTreeSet<(AgentId, SpaceId)>,
    tokens: Vec<AuthTokenRecord>,
    frames: Vec<FrameRecord>,
}

/// Storage held entirely in process memory
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_name<T, F: Fn(&T) -> &str>(mut items: Vec<T>, name: F) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

fn newest_first(mut frames: Vec<FrameRecord>, limit: usize) -> Vec<FrameRecord> {
    frames.sort_by(|a, b| b.time.cmp(&a.time));
    frames.truncate(limit);
    frames
}

impl Storage for MemoryStorage {
    fn create_agent(&self, name: &str, data: Data) -> Result<AgentRecord, StorageError> {
        check_name("agent", name)?;
        let mut state = self.state.write();
        if state.agents.values().any(|a| a.name == name) {
            return Err(StorageError::Conflict {
                entity: "agent",
                name: name.to_string(),
            });
        }
        let record = AgentRecord::new(name, data);
        state.agents.insert(record.uuid, record.clone());
        Ok(record)
    }

    fn get_agent(&self, uuid: &AgentId) -> Result<Option<AgentRecord>, StorageError> {
        Ok(self.state.read().agents.get(uuid).cloned())
    }

    fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .agents
            .values()
            .find(|a| a.name == name)
            .cloned())
    }

    fn list_agents(&self) -> Result<Vec<AgentRecord>, StorageError> {
        let agents = self.state.read().agents.values().cloned().collect();
        Ok(sorted_by_name(agents, |a: &AgentRecord| a.name.as_str()))
    }

    fn update_agent_meta(&self, uuid: &AgentId, meta: Data) -> Result<AgentRecord, StorageError> {
        let mut state = self.state.write();
        let record = state
            .agents
            .get_mut(uuid)
            .ok_or_else(|| StorageError::not_found("agent", uuid))?;
        record.meta = meta;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn delete_agent(&self, uuid: &AgentId) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.agents.remove(uuid);
        state.memberships.retain(|(agent, _)| agent != uuid);
        state.tokens.retain(|t| &t.agent != uuid);
        Ok(())
    }

    fn create_space(&self, name: &str, data: Data) -> Result<SpaceRecord, StorageError> {
        check_name("space", name)?;
        let mut state = self.state.write();
        if state.spaces.values().any(|s| s.name == name) {
            return Err(StorageError::Conflict {
                entity: "space",
                name: name.to_string(),
            });
        }
        let record = SpaceRecord::new(name, data);
        state.spaces.insert(record.uuid, record.clone());
        Ok(record)
    }

    fn get_space(&self, uuid: &SpaceId) -> Result<Option<SpaceRecord>, StorageError> {
        Ok(self.state.read().spaces.get(uuid).cloned())
    }

    fn get_space_by_name(&self, name: &str) -> Result<Option<SpaceRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .spaces
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StorageError> {
        let spaces = self.state.read().spaces.values().cloned().collect();
        Ok(sorted_by_name(spaces, |s: &SpaceRecord| s.name.as_str()))
    }

    fn delete_space(&self, uuid: &SpaceId) -> Result<(), StorageError> {
        let mut state = self.state.write();
        state.spaces.remove(uuid);
        state.memberships.retain(|(_, space)| space != uuid);
        Ok(())
    }

    fn join_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        let mut state = self.state.write();
        if !state.agents.contains_key(agent) {
            return Err(StorageError::not_found("agent", agent));
        }
        if !state.spaces.contains_key(space) {
            return Err(StorageError::not_found("space", space));
        }
        state.memberships.insert((*agent, *space));
        Ok(())
    }

    fn leave_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        self.state.write().memberships.remove(&(*agent, *space));
        Ok(())
    }

    fn agent_spaces(&self, agent: &AgentId) -> Result<Vec<SpaceRecord>, StorageError> {
        let state = self.state.read();
        let spaces = state
            .memberships
            .iter()
            .filter(|(a, _)| a == agent)
            .filter_map(|(_, s)| state.spaces.get(s).cloned())
            .collect();
        Ok(sorted_by_name(spaces, |s: &SpaceRecord| s.name.as_str()))
    }

    fn space_agents(&self, space: &SpaceId) -> Result<Vec<AgentRecord>, StorageError> {
        let state = self.state.read();
        let agents = state
            .memberships
            .iter()
            .filter(|(_, s)| s == space)
            .filter_map(|(a, _)| state.agents.get(a).cloned())
            .collect();
        Ok(sorted_by_name(agents, |a: &AgentRecord| a.name.as_str()))
    }

    fn mint_token(&self, agent: &AgentId) -> Result<AuthTokenRecord, StorageError> {
        let mut state = self.state.write();
        if !state.agents.contains_key(agent) {
            return Err(StorageError::not_found("agent", agent));
        }
        let record = AuthTokenRecord::mint(*agent);
        state.tokens.push(record.clone());
        Ok(record)
    }

    fn list_tokens(&self, agent: &AgentId) -> Result<Vec<AuthTokenRecord>, StorageError> {
        let mut tokens: Vec<AuthTokenRecord> = self
            .state
            .read()
            .tokens
            .iter()
            .filter(|t| &t.agent == agent)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        let mut state = self.state.write();
        let record = state
            .tokens
            .iter_mut()
            .find(|t| t.token == token)
            .ok_or_else(|| StorageError::not_found("token", "<redacted>"))?;
        record.revoked = true;
        Ok(())
    }

    fn get_agent_by_token(&self, token: &str) -> Result<Option<AgentRecord>, StorageError> {
        let state = self.state.read();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.token == token && !t.revoked)
            .and_then(|t| state.agents.get(&t.agent).cloned()))
    }

    fn create_frame(&self, record: FrameRecord) -> Result<FrameRecord, StorageError> {
        self.state.write().frames.push(record.clone());
        Ok(record)
    }

    fn list_frames_by_agent(&self, agent: &AgentId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        let frames = self
            .state
            .read()
            .frames
            .iter()
            .filter(|f| f.agent.as_ref() == Some(agent))
            .cloned()
            .collect();
        Ok(newest_first(frames, limit))
    }

    fn list_frames_by_space(&self, space: &SpaceId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        let frames = self
            .state
            .read()
            .frames
            .iter()
            .filter(|f| f.spaces.contains(space))
            .cloned()
            .collect();
        Ok(newest_first(frames, limit))
    }
}
