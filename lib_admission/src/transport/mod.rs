//! # Transport
//!
//! The persistent, message-oriented channel between the control plane and a node.
//! A node is served as a WebSocket endpoint (`/ws`) carrying one UTF-8 JSON object
//! per message in each direction; replies are matched to requests purely by their
//! order on the connection.
//!
//! - **`server`**: the axum router a node process exposes (`/ws`, `/status`, `/health`).
//! - **`client`**: `RemoteNode`, the control plane's handle to a node in another process.

/// The axum WebSocket endpoint of a node.
pub mod server;
/// The tokio-tungstenite handle to a node running elsewhere.
pub mod client;

pub use client::{RemoteNode, TransportError};
pub use server::{router, serve};
