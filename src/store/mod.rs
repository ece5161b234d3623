//! Record Store
//!
//! Persistent records for agents, spaces, auth tokens and frames, behind the
//! narrow [`Storage`] interface the hub consumes. Two implementations ship:
//! [`MemoryStorage`] for tests and ephemeral hubs, and
//! [`persistence::SledStorage`] for the binary.

pub mod memory;
pub mod persistence;

#[cfg(test)]
pub(crate) mod contract;

pub use memory::MemoryStorage;
pub use persistence::SledStorage;

use crate::error::StorageError;
use crate::frame::{Frame, FrameKind};
use crate::types::{AgentId, Data, FrameId, SpaceId, TokenId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent record: an identified participant with a persisted config blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub uuid: AgentId,
    pub name: String,
    #[serde(default)]
    pub data: Data,
    /// Server-merged config lives under `meta.config`
    #[serde(default)]
    pub meta: Data,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(name: impl Into<String>, data: Data) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid::Uuid::new_v4(),
            name: name.into(),
            data,
            meta: Data::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Space record: a named fan-out scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub uuid: SpaceId,
    pub name: String,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub meta: Data,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpaceRecord {
    pub fn new(name: impl Into<String>, data: Data) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid::Uuid::new_v4(),
            name: name.into(),
            data,
            meta: Data::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Bearer credential bound to exactly one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokenRecord {
    pub uuid: TokenId,
    pub token: String,
    pub agent: AgentId,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthTokenRecord {
    /// Mint a new opaque secret for `agent`
    pub fn mint(agent: AgentId) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            agent,
            revoked: false,
            created_at: Utc::now(),
        }
    }
}

/// Persisted frame, stamped with its sender and resolved spaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub uuid: FrameId,
    pub kind: FrameKind,
    pub name: String,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub meta: Data,
    pub time: DateTime<Utc>,
    pub agent: Option<AgentId>,
    pub spaces: Vec<SpaceId>,
    #[serde(default)]
    pub reply_to: Option<FrameId>,
}

impl FrameRecord {
    /// The frame as delivered to subscribers
    pub fn to_frame(&self) -> Frame {
        Frame {
            kind: self.kind,
            name: self.name.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
            time: Some(self.time),
            uuid: Some(self.uuid),
            reply_to: self.reply_to,
        }
    }
}

/// CRUD interface over agents, spaces, memberships, tokens and frames
pub trait Storage: Send + Sync {
    fn create_agent(&self, name: &str, data: Data) -> Result<AgentRecord, StorageError>;
    fn get_agent(&self, uuid: &AgentId) -> Result<Option<AgentRecord>, StorageError>;
    fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>, StorageError>;
    fn list_agents(&self) -> Result<Vec<AgentRecord>, StorageError>;
    /// Replace an agent's meta blob and bump `updated_at`
    fn update_agent_meta(&self, uuid: &AgentId, meta: Data) -> Result<AgentRecord, StorageError>;
    /// Delete an agent with its memberships and tokens
    fn delete_agent(&self, uuid: &AgentId) -> Result<(), StorageError>;

    fn create_space(&self, name: &str, data: Data) -> Result<SpaceRecord, StorageError>;
    fn get_space(&self, uuid: &SpaceId) -> Result<Option<SpaceRecord>, StorageError>;
    fn get_space_by_name(&self, name: &str) -> Result<Option<SpaceRecord>, StorageError>;
    fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StorageError>;
    fn delete_space(&self, uuid: &SpaceId) -> Result<(), StorageError>;

    fn join_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError>;
    fn leave_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError>;
    /// Spaces an agent belongs to, ordered by name
    fn agent_spaces(&self, agent: &AgentId) -> Result<Vec<SpaceRecord>, StorageError>;
    /// Agents belonging to a space, ordered by name
    fn space_agents(&self, space: &SpaceId) -> Result<Vec<AgentRecord>, StorageError>;

    fn mint_token(&self, agent: &AgentId) -> Result<AuthTokenRecord, StorageError>;
    /// Tokens of an agent, newest first
    fn list_tokens(&self, agent: &AgentId) -> Result<Vec<AuthTokenRecord>, StorageError>;
    fn revoke_token(&self, token: &str) -> Result<(), StorageError>;
    /// Resolve a bearer token; unknown and revoked tokens yield `None`
    fn get_agent_by_token(&self, token: &str) -> Result<Option<AgentRecord>, StorageError>;

    fn create_frame(&self, record: FrameRecord) -> Result<FrameRecord, StorageError>;
    /// Frames sent by an agent, newest first
    fn list_frames_by_agent(&self, agent: &AgentId, limit: usize) -> Result<Vec<FrameRecord>, StorageError>;
    /// Frames routed to a space, newest first
    fn list_frames_by_space(&self, space: &SpaceId, limit: usize) -> Result<Vec<FrameRecord>, StorageError>;
}

/// Validate a unique record name
pub(crate) fn check_name(entity: &'static str, name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty() {
        return Err(StorageError::InvalidName {
            entity,
            name: name.to_string(),
        });
    }
    Ok(())
}
