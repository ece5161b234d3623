//! Client transports
//!
//! A [`Connector`] turns a token into a [`Link`]: a pair of envelope
//! channels to and from the hub. Dropping the link's sender closes the
//! connection.

use crate::error::TransportError;
use crate::frame::Envelope;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

/// Duplex envelope channel to the hub
#[derive(Debug)]
pub struct Link {
    pub sender: mpsc::UnboundedSender<Envelope>,
    pub receiver: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate with `token`; a hub rejection is [`TransportError::Rejected`]
    async fn connect(&self, token: &str) -> Result<Link, TransportError>;
}

/// WebSocket connector (`ws://host:port/`)
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Link, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let socket = match tokio_tungstenite::connect_async(request).await {
            Ok((socket, _response)) => socket,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                return Err(TransportError::Rejected)
            }
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        };
        debug!(url = %self.url, "Connected to hub");

        let (mut write, mut read) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(envelope.to_text())).await {
                    debug!(error = %e, "Hub write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match Envelope::from_text(&text) {
                        Ok(envelope) => {
                            if in_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed envelope from hub"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Hub read failed");
                        break;
                    }
                }
            }
        });

        Ok(Link {
            sender: out_tx,
            receiver: in_rx,
        })
    }
}
