//! # Node Registry
//!
//! The control plane's directory of nodes, keyed by identifier and kept in
//! registration order. Iteration order is load-bearing: the broadcaster walks
//! nodes in this order, which decides tie-breaking between nodes with equal
//! headroom.
//!
//! Registration is rare and dispatch is frequent, so a single coarse `RwLock`
//! guards the map. Readers take a cheap snapshot of `NodeLink`s and release the
//! lock before awaiting anything.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::core::node_service::{NodeService, NodeStatus, DEFAULT_HISTORY_CAPACITY};
use crate::core::reply::NodeReply;
use crate::core::tier::{Command, TierConfig};
use crate::core::work::WorkOperation;

#[cfg(feature = "transport")]
use crate::transport::client::{RemoteNode, TransportError};

/// The registration cap used unless configured otherwise.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 100;

/// Why a registration was refused. Neither case changes the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry already holds its maximum number of nodes.
    #[error("registry is at capacity ({capacity} nodes)")]
    AtCapacity {
        /// The registration cap.
        capacity: usize,
    },

    /// A node with this identifier is already registered.
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),
}

/// # Node Link
///
/// How the control plane reaches a node: directly, when the node lives in this
/// process, or over a persistent connection, when it runs elsewhere. Admission is
/// always decided by the node that owns the ledger.
#[derive(Debug, Clone)]
pub enum NodeLink {
    /// A node in this process.
    Local(Arc<NodeService>),
    /// A node behind a WebSocket.
    #[cfg(feature = "transport")]
    Remote(Arc<RemoteNode>),
}

impl NodeLink {
    /// Node identifier.
    pub fn node_id(&self) -> &str {
        match self {
            NodeLink::Local(node) => node.node_id(),
            #[cfg(feature = "transport")]
            NodeLink::Remote(node) => node.node_id(),
        }
    }

    /// Runs `command` on the node.
    pub async fn process(&self, command: &Command) -> NodeReply {
        match self {
            NodeLink::Local(node) => node.process(command).await,
            #[cfg(feature = "transport")]
            NodeLink::Remote(node) => node.process(command).await,
        }
    }

    /// Whether the node has a free slot right now. Advisory: the node's own
    /// admission check still decides. A remote node that cannot be asked yields
    /// the transport error text.
    pub async fn has_headroom(&self) -> Result<bool, String> {
        match self {
            NodeLink::Local(node) => Ok(node.ledger().has_headroom()),
            #[cfg(feature = "transport")]
            NodeLink::Remote(node) => node
                .status()
                .await
                .map(|status| status.has_headroom())
                .map_err(|e| e.to_string()),
        }
    }

    /// The node's status.
    #[cfg(feature = "transport")]
    pub async fn status(&self) -> Result<NodeStatus, TransportError> {
        match self {
            NodeLink::Local(node) => Ok(node.status()),
            NodeLink::Remote(node) => node.status().await,
        }
    }

    /// The node's status.
    #[cfg(not(feature = "transport"))]
    pub async fn status(&self) -> Result<NodeStatus, std::convert::Infallible> {
        match self {
            NodeLink::Local(node) => Ok(node.status()),
        }
    }
}

/// Settings applied to every node the registry creates itself.
#[derive(Clone)]
pub struct NodeTemplate {
    /// Tier of new nodes.
    pub tier: TierConfig,
    /// Work operation shared by new nodes.
    pub work: Arc<dyn WorkOperation>,
    /// History cap of new nodes.
    pub history_capacity: usize,
}

impl NodeTemplate {
    /// A template with the default history cap.
    pub fn new(tier: TierConfig, work: Arc<dyn WorkOperation>) -> Self {
        Self {
            tier,
            work,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    fn build(&self, node_id: &str) -> NodeService {
        NodeService::new(node_id, self.tier.clone(), self.work.clone()).with_history_capacity(self.history_capacity)
    }
}

/// # Node Registry
pub struct NodeRegistry {
    capacity: usize,
    template: NodeTemplate,
    nodes: RwLock<Vec<NodeLink>>,
}

impl NodeRegistry {
    /// Creates an empty registry holding at most `capacity` nodes.
    pub fn new(capacity: usize, template: NodeTemplate) -> Self {
        Self {
            capacity,
            template,
            nodes: RwLock::new(Vec::new()),
        }
    }

    /// Creates an empty registry with the default cap of 100 nodes.
    pub fn with_template(template: NodeTemplate) -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY, template)
    }

    /// # Register
    ///
    /// Creates an in-process node from the template and adds it. Fails without
    /// changing anything when the registry is full or the identifier is taken.
    pub fn register(&self, node_id: &str) -> Result<Arc<NodeService>, RegistryError> {
        let node = Arc::new(self.template.build(node_id));
        self.insert(NodeLink::Local(node.clone()))?;
        Ok(node)
    }

    /// Adds an already built in-process node, e.g. one with its own tier.
    pub fn register_node(&self, node: Arc<NodeService>) -> Result<(), RegistryError> {
        self.insert(NodeLink::Local(node))
    }

    /// Adds a node running in another process, reachable at `url`.
    #[cfg(feature = "transport")]
    pub fn register_remote(&self, node_id: &str, url: &str) -> Result<Arc<RemoteNode>, RegistryError> {
        let node = Arc::new(RemoteNode::new(node_id, url));
        self.insert(NodeLink::Remote(node.clone()))?;
        Ok(node)
    }

    fn insert(&self, link: NodeLink) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        if nodes.len() >= self.capacity {
            log::warn!("Maximum nodes reached ({}), refusing {}", self.capacity, link.node_id());
            return Err(RegistryError::AtCapacity { capacity: self.capacity });
        }
        if nodes.iter().any(|n| n.node_id() == link.node_id()) {
            log::warn!("Node {} is already registered", link.node_id());
            return Err(RegistryError::DuplicateIdentifier(link.node_id().to_string()));
        }

        log::info!("Node registered: {}", link.node_id());
        nodes.push(link);
        Ok(())
    }

    /// All nodes in registration order.
    pub fn snapshot(&self) -> Vec<NodeLink> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Looks a node up by identifier.
    pub fn get(&self, node_id: &str) -> Option<NodeLink> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| n.node_id() == node_id)
            .cloned()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registration cap.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The tier new nodes are created with.
    pub fn tier(&self) -> &TierConfig {
        &self.template.tier
    }
}
