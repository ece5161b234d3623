//! Sled-backed storage
//!
//! One tree per record type, values encoded as JSON. Membership rows are keyed
//! `agent_uuid ++ space_uuid` (32 bytes, empty value). Frame keys are the
//! big-endian receipt time in nanoseconds followed by the frame uuid, so a
//! reverse scan yields newest first. Agent and space names map to their
//! uuid in separate index trees; a name is claimed with a compare-and-swap.

use super::{check_name, AgentRecord, AuthTokenRecord, FrameRecord, SpaceRecord, Storage};
use crate::error::StorageError;
use crate::types::{AgentId, Data, SpaceId};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

const AGENTS: &str = "agents";
const SPACES: &str = "spaces";
const MEMBERSHIPS: &str = "memberships";
const TOKENS: &str = "tokens";
const FRAMES: &str = "frames";
const AGENT_NAMES: &str = "agent_names";
const SPACE_NAMES: &str = "space_names";

/// Storage persisted in a sled database
pub struct SledStorage {
    db: sled::Db,
    agents: sled::Tree,
    spaces: sled::Tree,
    memberships: sled::Tree,
    tokens: sled::Tree,
    frames: sled::Tree,
    agent_names: sled::Tree,
    space_names: sled::Tree,
}

impl SledStorage {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        Self::from_db(sled::open(path)?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let storage = Self {
            agents: db.open_tree(AGENTS)?,
            spaces: db.open_tree(SPACES)?,
            memberships: db.open_tree(MEMBERSHIPS)?,
            tokens: db.open_tree(TOKENS)?,
            frames: db.open_tree(FRAMES)?,
            agent_names: db.open_tree(AGENT_NAMES)?,
            space_names: db.open_tree(SPACE_NAMES)?,
            db,
        };
        storage.backfill_names()?;
        Ok(storage)
    }

    /// Rebuild a missing name index from the record trees
    fn backfill_names(&self) -> Result<(), StorageError> {
        if self.agent_names.is_empty() {
            for agent in Self::scan::<AgentRecord>(&self.agents)? {
                self.agent_names.insert(agent.name.as_bytes(), &agent.uuid.as_bytes()[..])?;
            }
        }
        if self.space_names.is_empty() {
            for space in Self::scan::<SpaceRecord>(&self.spaces)? {
                self.space_names.insert(space.name.as_bytes(), &space.uuid.as_bytes()[..])?;
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn put<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), StorageError> {
        tree.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, StorageError> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StorageError> {
        tree.iter()
            .values()
            .map(|v| Ok(serde_json::from_slice(&v?)?))
            .collect()
    }

    /// Bind `name` to `uuid` unless another record already holds it
    fn claim_name(
        index: &sled::Tree,
        entity: &'static str,
        name: &str,
        uuid: &uuid::Uuid,
    ) -> Result<(), StorageError> {
        index
            .compare_and_swap(name.as_bytes(), None as Option<&[u8]>, Some(uuid.as_bytes().to_vec()))?
            .map_err(|_| StorageError::Conflict {
                entity,
                name: name.to_string(),
            })
    }

    /// Drop the binding for `name` if it still points at `uuid`
    fn release_name(index: &sled::Tree, name: &str, uuid: &uuid::Uuid) -> Result<(), StorageError> {
        // a mismatch means the name was already rebound
        let _ = index.compare_and_swap(name.as_bytes(), Some(uuid.as_bytes()), None as Option<&[u8]>)?;
        Ok(())
    }

    fn lookup_name<T: DeserializeOwned>(
        index: &sled::Tree,
        records: &sled::Tree,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        match index.get(name.as_bytes())? {
            Some(uuid) => Self::get(records, &uuid),
            None => Ok(None),
        }
    }

    fn membership_key(agent: &AgentId, space: &SpaceId) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(agent.as_bytes());
        key.extend_from_slice(space.as_bytes());
        key
    }

    fn frame_key(record: &FrameRecord) -> Vec<u8> {
        let nanos = record.time.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(record.uuid.as_bytes());
        key
    }

    fn memberships(&self) -> Result<Vec<(AgentId, SpaceId)>, StorageError> {
        let mut rows = Vec::new();
        for key in self.memberships.iter().keys() {
            let key = key?;
            if key.len() != 32 {
                continue;
            }
            let agent = uuid::Uuid::from_slice(&key[..16])
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let space = uuid::Uuid::from_slice(&key[16..])
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            rows.push((agent, space));
        }
        Ok(rows)
    }

    fn frames_newest_first<F>(&self, limit: usize, keep: F) -> Result<Vec<FrameRecord>, StorageError>
    where
        F: Fn(&FrameRecord) -> bool,
    {
        let mut out = Vec::new();
        for value in self.frames.iter().values().rev() {
            if out.len() >= limit {
                break;
            }
            let record: FrameRecord = serde_json::from_slice(&value?)?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

impl Storage for SledStorage {
    fn create_agent(&self, name: &str, data: Data) -> Result<AgentRecord, StorageError> {
        check_name("agent", name)?;
        let record = AgentRecord::new(name, data);
        Self::claim_name(&self.agent_names, "agent", name, &record.uuid)?;
        Self::put(&self.agents, record.uuid.as_bytes(), &record)?;
        Ok(record)
    }

    fn get_agent(&self, uuid: &AgentId) -> Result<Option<AgentRecord>, StorageError> {
        Self::get(&self.agents, uuid.as_bytes())
    }

    fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>, StorageError> {
        Self::lookup_name(&self.agent_names, &self.agents, name)
    }

    fn list_agents(&self) -> Result<Vec<AgentRecord>, StorageError> {
        let mut agents: Vec<AgentRecord> = Self::scan(&self.agents)?;
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    fn update_agent_meta(&self, uuid: &AgentId, meta: Data) -> Result<AgentRecord, StorageError> {
        let mut record = self
            .get_agent(uuid)?
            .ok_or_else(|| StorageError::not_found("agent", uuid))?;
        record.meta = meta;
        record.updated_at = Utc::now();
        Self::put(&self.agents, uuid.as_bytes(), &record)?;
        Ok(record)
    }

    fn delete_agent(&self, uuid: &AgentId) -> Result<(), StorageError> {
        if let Some(record) = Self::get::<AgentRecord>(&self.agents, uuid.as_bytes())? {
            Self::release_name(&self.agent_names, &record.name, uuid)?;
        }
        self.agents.remove(uuid.as_bytes())?;
        for (agent, space) in self.memberships()? {
            if &agent == uuid {
                self.memberships.remove(Self::membership_key(&agent, &space))?;
            }
        }
        for entry in self.tokens.iter() {
            let (key, value) = entry?;
            let token: AuthTokenRecord = serde_json::from_slice(&value)?;
            if &token.agent == uuid {
                self.tokens.remove(key)?;
            }
        }
        Ok(())
    }

    fn create_space(&self, name: &str, data: Data) -> Result<SpaceRecord, StorageError> {
        check_name("space", name)?;
        let record = SpaceRecord::new(name, data);
        Self::claim_name(&self.space_names, "space", name, &record.uuid)?;
        Self::put(&self.spaces, record.uuid.as_bytes(), &record)?;
        Ok(record)
    }

    fn get_space(&self, uuid: &SpaceId) -> Result<Option<SpaceRecord>, StorageError> {
        Self::get(&self.spaces, uuid.as_bytes())
    }

    fn get_space_by_name(&self, name: &str) -> Result<Option<SpaceRecord>, StorageError> {
        Self::lookup_name(&self.space_names, &self.spaces, name)
    }

    fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StorageError> {
        let mut spaces: Vec<SpaceRecord> = Self::scan(&self.spaces)?;
        spaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(spaces)
    }

    fn delete_space(&self, uuid: &SpaceId) -> Result<(), StorageError> {
        if let Some(record) = Self::get::<SpaceRecord>(&self.spaces, uuid.as_bytes())? {
            Self::release_name(&self.space_names, &record.name, uuid)?;
        }
        self.spaces.remove(uuid.as_bytes())?;
        for (agent, space) in self.memberships()? {
            if &space == uuid {
                self.memberships.remove(Self::membership_key(&agent, &space))?;
            }
        }
        Ok(())
    }

    fn join_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        if self.get_agent(agent)?.is_none() {
            return Err(StorageError::not_found("agent", agent));
        }
        if self.get_space(space)?.is_none() {
            return Err(StorageError::not_found("space", space));
        }
        self.memberships
            .insert(Self::membership_key(agent, space), &[] as &[u8])?;
        Ok(())
    }

    fn leave_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        self.memberships.remove(Self::membership_key(agent, space))?;
        Ok(())
    }

    fn agent_spaces(&self, agent: &AgentId) -> Result<Vec<SpaceRecord>, StorageError> {
        let mut spaces = Vec::new();
        for key in self.memberships.scan_prefix(agent.as_bytes()).keys() {
            let key = key?;
            if let Some(space) = Self::get::<SpaceRecord>(&self.spaces, &key[16..])? {
                spaces.push(space);
            }
        }
        spaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(spaces)
    }

    fn space_agents(&self, space: &SpaceId) -> Result<Vec<AgentRecord>, StorageError> {
        let mut agents = Vec::new();
        for (agent, s) in self.memberships()? {
            if &s == space {
                if let Some(record) = self.get_agent(&agent)? {
                    agents.push(record);
                }
            }
        }
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    fn mint_token(&self, agent: &AgentId) -> Result<AuthTokenRecord, StorageError> {
        if self.get_agent(agent)?.is_none() {
            return Err(StorageError::not_found("agent", agent));
        }
        let record = AuthTokenRecord::mint(*agent);
        Self::put(&self.tokens, record.token.as_bytes(), &record)?;
        Ok(record)
    }

    fn list_tokens(&self, agent: &AgentId) -> Result<Vec<AuthTokenRecord>, StorageError> {
        let mut tokens: Vec<AuthTokenRecord> = Self::scan::<AuthTokenRecord>(&self.tokens)?
            .into_iter()
            .filter(|t| &t.agent == agent)
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        let mut record: AuthTokenRecord = Self::get(&self.tokens, token.as_bytes())?
            .ok_or_else(|| StorageError::not_found("token", "<redacted>"))?;
        record.revoked = true;
        Self::put(&self.tokens, token.as_bytes(), &record)
    }

    fn get_agent_by_token(&self, token: &str) -> Result<Option<AgentRecord>, StorageError> {
        match Self::get::<AuthTokenRecord>(&self.tokens, token.as_bytes())? {
            Some(record) if !record.revoked => self.get_agent(&record.agent),
            _ => Ok(None),
        }
    }

    fn create_frame(&self, record: FrameRecord) -> Result<FrameRecord, StorageError> {
        Self::put(&self.frames, &Self::frame_key(&record), &record)?;
        Ok(record)
    }

    fn list_frames_by_agent(&self, agent: &AgentId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        self.frames_newest_first(limit, |f| f.agent.as_ref() == Some(agent))
    }

    fn list_frames_by_space(&self, space: &SpaceId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        self.frames_newest_first(limit, |f| f.spaces.contains(space))
    }
}
