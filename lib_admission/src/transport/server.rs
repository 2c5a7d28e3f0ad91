use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::core::node_service::{MessageReply, NodeService, NodeStatus};
use crate::core::reply::NodeReply;

/// Builds the router for one node.
pub fn router(node: Arc<NodeService>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(node)
}

/// Serves `node` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, node: Arc<NodeService>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    log::info!("Node {} listening on ws://{}/ws", node.node_id(), addr);

    axum::serve(listener, router(node).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(node): State<Arc<NodeService>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, node, addr))
}

async fn status_handler(State(node): State<Arc<NodeService>>) -> Json<NodeStatus> {
    Json(node.status())
}

async fn health_handler() -> &'static str {
    "OK"
}

/// # WebSocket Connection Loop
///
/// Reads one message at a time, hands it to the node and writes the reply
/// before reading the next, so replies keep request order. Malformed input is
/// answered and the loop carries on; only a close frame, a transport error or a
/// failed send ends the session.
async fn handle_socket(mut socket: WebSocket, node: Arc<NodeService>, peer: SocketAddr) {
    let _connection = node.open_connection(peer.to_string());

    while let Some(msg) = socket.recv().await {
        let reply = match msg {
            Ok(Message::Text(text)) => node.handle_message(text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => node.handle_message(text).await,
                Err(e) => {
                    log::warn!("Node {} received a binary frame that is not UTF-8: {}", node.node_id(), e);
                    MessageReply::Command(NodeReply::invalid_json(node.node_id(), e))
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Node {}: connection from {} failed: {}", node.node_id(), peer, e);
                break;
            }
        };

        let body = serde_json::to_string(&reply)
            .unwrap_or_else(|e| json!({ "error": e.to_string(), "node": node.node_id() }).to_string());

        if socket.send(Message::Text(body.into())).await.is_err() {
            break;
        }
    }
}
