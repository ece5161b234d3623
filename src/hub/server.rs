//! WebSocket front end for the hub
//!
//! Tokens are checked inside the upgrade callback, so a rejected client gets
//! a plain HTTP 401 and never reaches frame routing. Each accepted socket is
//! served by one task that reads inbound envelopes in order and forwards the
//! session outbox to the peer.

use super::{Hub, SessionHandle};
use crate::error::TransportError;
use crate::frame::Envelope;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Extract a bearer token from the upgrade request
pub fn request_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        if let Some(token) = value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
            return Some(token.trim().to_string());
        }
    }
    request.uri().query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "token")
            .map(|(_, value)| value.to_string())
    })
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Listening hub server
pub struct HubServer {
    hub: Arc<Hub>,
    listener: TcpListener,
}

impl HubServer {
    pub async fn bind(hub: Arc<Hub>, addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { hub, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until `cancel` fires, then close every session
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), TransportError> {
        let tracker = TaskTracker::new();
        info!(addr = %self.local_addr()?, "Hub listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let hub = Arc::clone(&self.hub);
                    let cancel = cancel.child_token();
                    tracker.spawn(async move {
                        serve_connection(hub, stream, peer, cancel).await;
                    });
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        self.hub.shutdown();
        Ok(())
    }
}

async fn serve_connection(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
    let mut opened: Option<SessionHandle> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let token = request_token(request).ok_or_else(unauthorized)?;
        let agent = hub.authenticate(&token).map_err(|_| unauthorized())?;
        match hub.open_session(&agent) {
            Ok(session) => {
                opened = Some(session);
                Ok(response)
            }
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "Failed to open session");
                Err(unauthorized())
            }
        }
    };

    let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    let socket = match handshake {
        Ok(socket) => socket,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Handshake failed");
            if let Some(session) = opened {
                hub.disconnect(session.id);
            }
            return;
        }
    };
    let Some(mut session) = opened else {
        return;
    };
    debug!(peer = %peer, session = %session.id, agent = %session.agent, "WebSocket established");

    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            outbound = session.receiver.recv() => {
                let Some(envelope) = outbound else { break };
                if let Err(e) = write.send(Message::Text(envelope.to_text())).await {
                    debug!(session = %session.id, error = %e, "Write failed");
                    break;
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => match Envelope::from_text(&text) {
                    Ok(envelope) => hub.dispatch(session.id, envelope),
                    Err(e) => {
                        warn!(session = %session.id, error = %e, "Malformed envelope");
                        hub.send_to(session.id, Envelope::error("", &e));
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %session.id, error = %e, "Read failed");
                    break;
                }
            }
        }
    }

    hub.disconnect(session.id);
}
