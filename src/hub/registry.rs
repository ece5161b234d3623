//! Connection registry
//!
//! Live connections keyed by session id, plus one subscriber set per space
//! (the fan-out group). Owned by a [`super::Hub`] instance.

use crate::frame::{Envelope, Identity, SpaceRef};
use crate::types::{AgentId, SessionId, SpaceId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One authenticated session
#[derive(Debug)]
pub struct Connection {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub agent_name: String,
    /// Membership snapshot taken at connect time
    pub spaces: Vec<SpaceRef>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    pub fn new(
        agent_id: AgentId,
        agent_name: impl Into<String>,
        spaces: Vec<SpaceRef>,
        outbox: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            id: SessionId::next(),
            agent_id,
            agent_name: agent_name.into(),
            spaces,
            outbox,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            name: self.agent_name.clone(),
            spaces: self.spaces.clone(),
        }
    }

    /// Queue an envelope for this session; false once the peer is gone
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.outbox.send(envelope).is_err() {
            debug!(session = %self.id, agent = %self.agent_name, "Outbox closed, dropping envelope");
            return false;
        }
        true
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, Arc<Connection>>,
    rooms: HashMap<SpaceId, BTreeSet<SessionId>>,
}

/// Session table and per-space subscriber sets
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and subscribe it to its snapshot spaces
    pub fn insert(&self, connection: Connection) -> Arc<Connection> {
        let connection = Arc::new(connection);
        let mut state = self.state.write();
        for space in &connection.spaces {
            state.rooms.entry(space.uuid).or_default().insert(connection.id);
        }
        state.sessions.insert(connection.id, Arc::clone(&connection));
        connection
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Connection>> {
        let mut state = self.state.write();
        let connection = state.sessions.remove(&id)?;
        for space in &connection.spaces {
            if let Some(room) = state.rooms.get_mut(&space.uuid) {
                room.remove(&id);
                if room.is_empty() {
                    state.rooms.remove(&space.uuid);
                }
            }
        }
        Some(connection)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Connection>> {
        self.state.read().sessions.get(&id).cloned()
    }

    /// Connections subscribed to `space`, in session order
    pub fn subscribers(&self, space: &SpaceId) -> Vec<Arc<Connection>> {
        let state = self.state.read();
        state
            .rooms
            .get(space)
            .map(|room| {
                room.iter()
                    .filter_map(|id| state.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every connection; their outboxes close with them
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.sessions.clear();
        state.rooms.clear();
    }
}
