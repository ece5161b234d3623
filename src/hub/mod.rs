//! Frame Broker
//!
//! Authenticates sessions, snapshots their space memberships, routes event
//! frames to every subscriber of each resolved space and answers the
//! `identity` / `config` / `config-update` command sub-protocol.
//!
//! Fan-out is once per space: a session subscribed to two resolved spaces of
//! one frame receives two copies, each tagged with `meta.space`.
//!
//! All operations are synchronous; a transport drives one session's inbound
//! traffic sequentially, which makes each command atomic for that session.
//! Two sessions of the same agent racing `config` resolve last-write-wins.

pub mod local;
pub mod registry;
pub mod server;

pub use local::LocalConnector;
pub use registry::{Connection, ConnectionRegistry};
pub use server::HubServer;

use crate::error::{HubError, ProtocolError};
use crate::frame::settings::{apply_delta, merge_server_over_client, stored_config, CONFIG_META_KEY};
use crate::frame::{
    Channel, Envelope, Frame, FrameKind, FrameRequest, SpaceRef, CONFIG_COMMAND, CONFIG_UPDATE_COMMAND,
    IDENTITY_COMMAND,
};
use crate::store::{AgentRecord, FrameRecord, SpaceRecord, Storage};
use crate::types::{Data, SessionId};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A freshly opened session: its id and the stream of envelopes for the peer
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub agent: String,
    pub receiver: mpsc::UnboundedReceiver<Envelope>,
}

/// Single logical broker instance
pub struct Hub {
    storage: Arc<dyn Storage>,
    registry: ConnectionRegistry,
}

impl Hub {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Resolve a bearer token. Lookup failures count as authentication
    /// failures and never propagate further.
    pub fn authenticate(&self, token: &str) -> Result<AgentRecord, HubError> {
        match self.storage.get_agent_by_token(token) {
            Ok(Some(agent)) => Ok(agent),
            Ok(None) => {
                warn!("Rejected connection: unknown or revoked token");
                Err(HubError::Authentication("unknown or revoked token".to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Rejected connection: token lookup failed");
                Err(HubError::Authentication("token lookup failed".to_string()))
            }
        }
    }

    /// Register a session for an authenticated agent and push its identity
    pub fn open_session(&self, agent: &AgentRecord) -> Result<SessionHandle, HubError> {
        let spaces: Vec<SpaceRef> = self
            .storage
            .agent_spaces(&agent.uuid)?
            .into_iter()
            .map(space_ref)
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self
            .registry
            .insert(Connection::new(agent.uuid, agent.name.clone(), spaces, tx));

        for space in &connection.spaces {
            debug!(session = %connection.id, agent = %agent.name, space = %space.name, "Joined space");
        }
        info!(
            session = %connection.id,
            agent = %agent.name,
            spaces = connection.spaces.len(),
            "Agent connected"
        );
        connection.send(Envelope::command_reply(&connection.identity().to_frame()));

        Ok(SessionHandle {
            id: connection.id,
            agent: agent.name.clone(),
            receiver: rx,
        })
    }

    /// Handshake: authenticate then open a session
    pub fn connect(&self, token: &str) -> Result<SessionHandle, HubError> {
        let agent = self.authenticate(token)?;
        self.open_session(&agent)
    }

    /// Drop a session. No persistence side effect.
    pub fn disconnect(&self, session: SessionId) {
        if let Some(connection) = self.registry.remove(session) {
            info!(session = %session, agent = %connection.agent_name, "Agent disconnected");
        }
    }

    /// Queue an envelope for a single session
    pub fn send_to(&self, session: SessionId, envelope: Envelope) -> bool {
        match self.registry.get(session) {
            Some(connection) => connection.send(envelope),
            None => false,
        }
    }

    /// Process one inbound envelope; failures are reported to the sender on
    /// the `error` channel and never close the session
    pub fn dispatch(&self, session: SessionId, envelope: Envelope) {
        let channel = envelope.channel.clone();
        if let Err(e) = self.handle(session, envelope) {
            match &e {
                HubError::Persistence(_) => {
                    error!(session = %session, channel = %channel, error = %e, "Failed to handle frame")
                }
                _ => warn!(session = %session, channel = %channel, error = %e, "Rejected frame"),
            }
            self.send_to(session, Envelope::error(&channel, &e));
        }
    }

    /// Process one inbound envelope, surfacing failures to the caller
    pub fn handle(&self, session: SessionId, envelope: Envelope) -> Result<(), HubError> {
        let connection = self
            .registry
            .get(session)
            .ok_or(HubError::UnknownSession(session))?;

        match envelope.parse_channel() {
            Channel::Event(_) => {
                let mut request: FrameRequest =
                    serde_json::from_value(envelope.payload).map_err(|source| ProtocolError::Malformed {
                        channel: envelope.channel.clone(),
                        source,
                    })?;
                request.frame.kind = FrameKind::Event;
                self.publish(&connection, request).map(|_| ())
            }
            Channel::Command(_) => {
                let frame = Frame::from_payload(&envelope.channel, envelope.payload)?;
                self.command(&connection, frame)
            }
            Channel::CommandReply | Channel::Error | Channel::Unknown(_) => {
                Err(ProtocolError::UnknownChannel(envelope.channel).into())
            }
        }
    }

    /// Persist an event frame and fan it out to its resolved spaces
    pub fn publish(&self, connection: &Connection, request: FrameRequest) -> Result<FrameRecord, HubError> {
        request.frame.validate()?;

        let targets: Vec<&SpaceRef> = match request.target_names() {
            Some(names) => connection
                .spaces
                .iter()
                .filter(|s| names.iter().any(|n| n == &s.name))
                .collect(),
            None => connection.spaces.iter().collect(),
        };

        let mut meta = Data::new();
        meta.insert("agent".to_string(), Value::String(connection.agent_name.clone()));
        let frame = request.frame;
        let record = self.storage.create_frame(FrameRecord {
            uuid: uuid::Uuid::new_v4(),
            kind: frame.kind,
            name: frame.name,
            data: frame.data,
            meta,
            time: Utc::now(),
            agent: Some(connection.agent_id),
            spaces: targets.iter().map(|s| s.uuid).collect(),
            reply_to: frame.reply_to,
        })?;

        let routed = record.to_frame();
        let mut delivered = 0usize;
        for space in &targets {
            let mut copy = routed.clone();
            copy.meta
                .insert("space".to_string(), Value::String(space.name.clone()));
            let envelope = Envelope::for_frame(&copy);
            for subscriber in self.registry.subscribers(&space.uuid) {
                if subscriber.send(envelope.clone()) {
                    delivered += 1;
                }
            }
        }

        info!(
            session = %connection.id,
            agent = %connection.agent_name,
            frame = %record.name,
            spaces = %targets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", "),
            delivered,
            "Routed frame"
        );
        Ok(record)
    }

    /// Answer a command frame from `connection`
    pub fn command(&self, connection: &Connection, frame: Frame) -> Result<(), HubError> {
        frame.validate()?;
        debug!(session = %connection.id, agent = %connection.agent_name, command = %frame.name, "Received command");

        match frame.name.as_str() {
            IDENTITY_COMMAND => {
                let reply = connection.identity().to_frame().replying_to(frame.uuid);
                connection.send(Envelope::command_reply(&reply));
                Ok(())
            }
            CONFIG_COMMAND => {
                let merged = self.sync_config(connection, |stored| merge_server_over_client(&frame.data, stored))?;
                info!(agent = %connection.agent_name, "Agent configured");
                let reply = Frame::command(CONFIG_COMMAND, merged).replying_to(frame.uuid);
                connection.send(Envelope::command_reply(&reply));
                Ok(())
            }
            CONFIG_UPDATE_COMMAND => {
                let merged = self.sync_config(connection, |stored| apply_delta(stored, &frame.data))?;
                info!(agent = %connection.agent_name, keys = frame.data.len(), "Agent config updated");
                let reply = Frame::command(CONFIG_COMMAND, merged).replying_to(frame.uuid);
                connection.send(Envelope::command_reply(&reply));
                Ok(())
            }
            other => {
                warn!(agent = %connection.agent_name, command = %other, "Unknown command");
                Ok(())
            }
        }
    }

    /// Load the stored config, merge, persist, return the merge
    fn sync_config<F>(&self, connection: &Connection, merge: F) -> Result<Data, HubError>
    where
        F: FnOnce(&Data) -> Data,
    {
        let agent = self
            .storage
            .get_agent(&connection.agent_id)?
            .ok_or_else(|| crate::error::StorageError::not_found("agent", connection.agent_id))?;
        let merged = merge(&stored_config(&agent.meta));
        let mut meta = agent.meta;
        meta.insert(CONFIG_META_KEY.to_string(), Value::Object(merged.clone()));
        self.storage.update_agent_meta(&agent.uuid, meta)?;
        Ok(merged)
    }

    /// Close every session
    pub fn shutdown(&self) {
        let sessions = self.registry.len();
        self.registry.clear();
        info!(sessions, "Hub shut down");
    }
}

fn space_ref(space: SpaceRecord) -> SpaceRef {
    SpaceRef {
        uuid: space.uuid,
        name: space.name,
        data: space.data,
        meta: space.meta,
    }
}
