//! Core types shared by the hub, the agent runtime and storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// AgentId: stable identifier of an agent record
pub type AgentId = uuid::Uuid;

/// SpaceId: stable identifier of a space record
pub type SpaceId = uuid::Uuid;

/// FrameId: identifier assigned to a frame when it is persisted
pub type FrameId = uuid::Uuid;

/// TokenId: identifier of an auth token record
pub type TokenId = uuid::Uuid;

/// Data: a JSON object, used for frame `data`/`meta` and record blobs
pub type Data = serde_json::Map<String, serde_json::Value>;

/// SessionId: hub-local identifier of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next process-unique session id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
