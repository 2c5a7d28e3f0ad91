use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::core::node_service::NodeStatus;
use crate::core::reply::NodeReply;
use crate::core::tier::Command;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to encode or decode message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection to {0} closed")]
    Closed(String),
}

/// # Remote Node
///
/// A persistent WebSocket handle to a node served by another process. The
/// connection is opened on first use and reopened after any failure. Requests
/// on one handle are serialized, which keeps replies in request order.
pub struct RemoteNode {
    node_id: String,
    url: String,
    stream: Mutex<Option<WsStream>>,
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("node_id", &self.node_id)
            .field("url", &self.url)
            .finish()
    }
}

impl RemoteNode {
    pub fn new(node_id: &str, url: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            url: url.to_string(),
            stream: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends `command` and waits for the node's reply. Transport trouble is
    /// reported as a failed reply for this node rather than an error.
    pub async fn process(&self, command: &Command) -> NodeReply {
        match self.request_reply(command).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Remote node {} unreachable: {}", self.node_id, e);
                NodeReply::failure(&self.node_id, e.to_string())
            }
        }
    }

    async fn request_reply(&self, command: &Command) -> Result<NodeReply, TransportError> {
        let body = serde_json::to_string(command)?;
        let text = self.exchange(body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Asks the node for its status over the same connection.
    pub async fn status(&self) -> Result<NodeStatus, TransportError> {
        let text = self.exchange(json!({ "action": "status" }).to_string()).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn exchange(&self, body: String) -> Result<String, TransportError> {
        let mut slot = self.stream.lock().await;

        // The stream stays out of the slot while a request is in flight; a dropped
        // request takes it along and the next one reconnects.
        let mut ws = match slot.take() {
            Some(ws) => ws,
            None => {
                let (ws, _) = connect_async(self.url.as_str()).await.map_err(|source| TransportError::Connect {
                    url: self.url.clone(),
                    source,
                })?;
                log::info!("Connected to remote node {} at {}", self.node_id, self.url);
                ws
            }
        };

        let text = round_trip(&mut ws, body, &self.url).await?;
        *slot = Some(ws);
        Ok(text)
    }
}

async fn round_trip(ws: &mut WsStream, body: String, url: &str) -> Result<String, TransportError> {
    ws.send(Message::Text(body.into())).await?;

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => return Ok(text.as_str().to_owned()),
            Message::Binary(bytes) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(TransportError::Closed(url.to_string()))
}
