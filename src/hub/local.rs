//! In-process connector
//!
//! Connects an agent runtime straight to a [`Hub`] living in the same
//! process, without a socket. Used by tests and by embedders that run hub and
//! agents together.

use super::Hub;
use crate::error::{HubError, TransportError};
use crate::frame::Envelope;
use crate::runtime::transport::{Connector, Link};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct LocalConnector {
    hub: Arc<Hub>,
}

impl LocalConnector {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, token: &str) -> Result<Link, TransportError> {
        let session = self.hub.connect(token).map_err(|e| match e {
            HubError::Authentication(_) => TransportError::Rejected,
            other => TransportError::Connect(other.to_string()),
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let hub = Arc::clone(&self.hub);
        let id = session.id;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                hub.dispatch(id, envelope);
            }
            debug!(session = %id, "Local link closed");
            hub.disconnect(id);
        });

        Ok(Link {
            sender: tx,
            receiver: session.receiver,
        })
    }
}
