//! Agent handle
//!
//! Cheap cloneable view of a running agent, handed to every handler, hook
//! and scheduled job. Outbound sends fail with [`RuntimeError::Disconnected`]
//! once the runtime has closed its link.

use crate::error::RuntimeError;
use crate::frame::settings::ConfigSchema;
use crate::frame::{
    Envelope, Frame, FrameRequest, Identity, CONFIG_COMMAND, CONFIG_UPDATE_COMMAND, IDENTITY_COMMAND,
};
use crate::types::{Data, FrameId};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

struct HandleInner {
    name: String,
    schema: ConfigSchema,
    request_timeout: Duration,
    outbound: RwLock<Option<mpsc::UnboundedSender<Envelope>>>,
    identity: RwLock<Option<Identity>>,
    config: RwLock<Data>,
    pending: Mutex<HashMap<FrameId, oneshot::Sender<Frame>>>,
}

#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<HandleInner>,
}

impl AgentHandle {
    pub(crate) fn new(name: impl Into<String>, schema: ConfigSchema, request_timeout: Duration) -> Self {
        let config = schema.defaults();
        Self {
            inner: Arc::new(HandleInner {
                name: name.into(),
                schema,
                request_timeout,
                outbound: RwLock::new(None),
                identity: RwLock::new(None),
                config: RwLock::new(config),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity pushed by the hub at connect time
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().clone()
    }

    /// Live config: schema defaults until the first sync completes
    pub fn config(&self) -> Data {
        self.inner.config.read().clone()
    }

    /// Typed lookup of one config value
    pub fn config_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.config.read().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .outbound
            .read()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Emit an event to every space this agent joined
    pub fn emit(&self, name: &str, data: Data) -> Result<(), RuntimeError> {
        self.publish(FrameRequest::new(Frame::event(name, data)))
    }

    /// Emit an event to the named spaces (intersected with membership by the hub)
    pub fn emit_to<I, S>(&self, name: &str, data: Data, spaces: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish(FrameRequest::new(Frame::event(name, data)).to_spaces(spaces))
    }

    pub fn publish(&self, request: FrameRequest) -> Result<(), RuntimeError> {
        request.frame.validate()?;
        self.send(Envelope::publish(&request))
    }

    /// Fire-and-forget command
    pub fn command(&self, name: &str, data: Data) -> Result<(), RuntimeError> {
        let frame = Frame::command(name, data).with_uuid();
        frame.validate()?;
        self.send(Envelope::for_frame(&frame))
    }

    /// Send `config-update` and adopt the merged config the hub returns.
    /// A delta that does not fit the schema is rejected before it is sent.
    pub async fn config_update(&self, delta: Data) -> Result<Data, RuntimeError> {
        self.inner.schema.validate(&delta)?;
        let reply = self
            .request(Frame::command(CONFIG_UPDATE_COMMAND, delta), "config-update reply")
            .await?;
        self.apply_config(reply.data.clone())?;
        Ok(reply.data)
    }

    /// Ask the hub to re-send this agent's identity
    pub async fn request_identity(&self) -> Result<Identity, RuntimeError> {
        let reply = self
            .request(Frame::command(IDENTITY_COMMAND, Data::new()), "identity reply")
            .await?;
        let identity = Identity::from_frame(&reply)?;
        self.set_identity(identity.clone());
        Ok(identity)
    }

    async fn request(&self, frame: Frame, waiting_for: &'static str) -> Result<Frame, RuntimeError> {
        let id = uuid::Uuid::new_v4();
        let mut frame = frame;
        frame.uuid = Some(id);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        if let Err(e) = self.send(Envelope::for_frame(&frame)) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RuntimeError::Disconnected),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(RuntimeError::Timeout(waiting_for))
            }
        }
    }

    fn send(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        let outbound = self.inner.outbound.read();
        let tx = outbound.as_ref().ok_or(RuntimeError::Disconnected)?;
        tx.send(envelope).map_err(|_| RuntimeError::Disconnected)
    }

    pub(crate) fn attach(&self, sender: mpsc::UnboundedSender<Envelope>) {
        *self.inner.outbound.write() = Some(sender);
    }

    /// Drop the outbound sender and fail every pending request
    pub(crate) fn detach(&self) {
        self.inner.outbound.write().take();
        self.inner.pending.lock().clear();
    }

    pub(crate) fn set_identity(&self, identity: Identity) {
        debug!(agent = %self.inner.name, spaces = ?identity.space_names(), "Identity updated");
        *self.inner.identity.write() = Some(identity);
    }

    /// Validate against the schema, then replace the live config
    pub(crate) fn apply_config(&self, config: Data) -> Result<(), RuntimeError> {
        self.inner.schema.validate(&config)?;
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Hand a reply to the request awaiting it; returns the frame when
    /// nothing was waiting
    pub(crate) fn resolve_reply(&self, frame: Frame) -> Option<Frame> {
        let Some(id) = frame.reply_to else {
            return Some(frame);
        };
        match self.inner.pending.lock().remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(frame);
                None
            }
            None => Some(frame),
        }
    }

    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<(), RuntimeError> {
        self.send(Envelope::for_frame(frame))
    }

    /// Frame for the initial `config` round trip
    pub(crate) fn config_request(&self) -> Frame {
        Frame::command(CONFIG_COMMAND, self.inner.schema.defaults()).with_uuid()
    }
}
