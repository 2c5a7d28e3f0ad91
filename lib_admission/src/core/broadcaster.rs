//! # Broadcaster
//!
//! Fans one logical command out to every registered node that currently has a
//! free slot and collects one reply per node it dispatched to.
//!
//! ## Logic:
//! 1.  Take a snapshot of the registry, in registration order.
//! 2.  **Pre-filter**: skip nodes with no free slot. Skipped nodes receive
//!     nothing and do not appear in the results. The check is advisory and may
//!     race with concurrent admissions in both directions; the node's own
//!     admission check is authoritative.
//! 3.  Dispatch to the node and wait for its reply before moving on, so results
//!     come back in registration order.
//! 4.  Append every attempt, admitted or rejected, to the audit log.
//!
//! A failing node never aborts the fan-out: an unreachable remote node shows up
//! as a failed reply for that node and the loop continues.

use std::sync::Arc;

use crate::core::audit::{AuditEntry, AuditLog};
use crate::core::registry::NodeRegistry;
use crate::core::reply::NodeReply;
use crate::core::tier::Command;

/// # Broadcaster
pub struct Broadcaster {
    registry: Arc<NodeRegistry>,
    audit: Arc<AuditLog>,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`, recording into `audit`.
    pub fn new(registry: Arc<NodeRegistry>, audit: Arc<AuditLog>) -> Self {
        Self { registry, audit }
    }

    /// # Dispatch
    ///
    /// Sends `command` to every eligible node and returns their replies in
    /// registration order.
    pub async fn dispatch(&self, command: &Command) -> Vec<NodeReply> {
        let nodes = self.registry.snapshot();
        log::info!("Broadcasting command '{}' to {} nodes", command.action, nodes.len());

        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            let reply = match node.has_headroom().await {
                Ok(true) => node.process(command).await,
                Ok(false) => {
                    log::debug!("Node {} at capacity, skipped", node.node_id());
                    continue;
                }
                Err(e) => {
                    log::warn!("Node {} unreachable: {}", node.node_id(), e);
                    NodeReply::failure(node.node_id(), e)
                }
            };

            self.audit.append(AuditEntry::new(command, node.node_id(), &reply));
            results.push(reply);
        }
        results
    }

    /// The registry dispatched over.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The audit log dispatches are recorded in.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_service::NodeService;
    use crate::core::registry::NodeTemplate;
    use crate::core::tier::TierConfig;
    use crate::core::work::SimulatedWork;
    use std::time::Duration;

    fn work() -> Arc<SimulatedWork> {
        Arc::new(SimulatedWork::new(Duration::from_millis(1)))
    }

    fn broadcaster() -> Broadcaster {
        let template = NodeTemplate::new(TierConfig::new("PUBLIC", 2, 8192, ["p1"], 1), work());
        Broadcaster::new(Arc::new(NodeRegistry::new(10, template)), Arc::new(AuditLog::new(100)))
    }

    #[tokio::test]
    async fn test_empty_registry_dispatches_nothing() {
        let b = broadcaster();
        let results = b.dispatch(&Command::new("process", "p1")).await;
        assert!(results.is_empty());
        assert!(b.audit().is_empty());
    }

    #[tokio::test]
    async fn test_saturated_node_is_skipped() {
        let b = broadcaster();
        b.registry().register("A").unwrap();
        let saturated = Arc::new(NodeService::new("B", TierConfig::new("PUBLIC", 0, 8192, ["p1"], 1), work()));
        b.registry().register_node(saturated).unwrap();

        let results = b.dispatch(&Command::new("process", "p1")).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node(), "A");
        assert!(results[0].is_processed());
        assert_eq!(b.audit().len(), 1);
    }

    #[tokio::test]
    async fn test_results_follow_registration_order_and_rejections_are_audited() {
        let b = broadcaster();
        for id in ["N3", "N1", "N2"] {
            b.registry().register(id).unwrap();
        }

        // Profile not allowed: every node rejects, and every attempt is audited.
        let results = b.dispatch(&Command::new("process", "other")).await;
        let order: Vec<&str> = results.iter().map(|r| r.node()).collect();
        assert_eq!(order, vec!["N3", "N1", "N2"]);
        assert!(results.iter().all(|r| r.is_rejected()));

        let audited: Vec<String> = b.audit().entries().into_iter().map(|e| e.node_id).collect();
        assert_eq!(audited, vec!["N3", "N1", "N2"]);
    }
}
