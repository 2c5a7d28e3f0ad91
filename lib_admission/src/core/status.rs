//! # Status Aggregator
//!
//! Cluster-wide utilization, summed fresh from every node's ledger on each call.
//! Nothing is cached, so the figures are as current as the nodes themselves.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::registry::NodeRegistry;

/// Utilization across every registered node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Tier label of the deployment.
    pub tier: String,
    /// Registered nodes, reachable or not.
    pub total_nodes: usize,
    /// Slots in use, summed over reachable nodes.
    pub active_slots: u64,
    /// Slot limits, summed over reachable nodes.
    pub max_slots: u64,
    /// `active_slots / max_slots * 100`, or `0` when there is no capacity.
    pub utilization_percent: f64,
    /// Profiles allowed on the first reachable node; empty with no nodes.
    pub allowed_profiles: Vec<String>,
    /// Remote nodes whose status could not be read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable: Vec<String>,
}

/// Percentage of `max` that `active` represents, defined as `0` for no capacity.
pub fn utilization_percent(active: u64, max: u64) -> f64 {
    if max == 0 {
        0.0
    } else {
        (active as f64 / max as f64) * 100.0
    }
}

/// # Status Aggregator
pub struct StatusAggregator {
    registry: Arc<NodeRegistry>,
}

impl StatusAggregator {
    /// Aggregates over `registry`.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Computes the current cluster status.
    pub async fn status(&self) -> ClusterStatus {
        let nodes = self.registry.snapshot();
        let mut active_slots = 0u64;
        let mut max_slots = 0u64;
        let mut allowed_profiles: Option<Vec<String>> = None;
        let mut unreachable = Vec::new();

        for node in &nodes {
            match node.status().await {
                Ok(status) => {
                    active_slots += u64::from(status.active_slots);
                    max_slots += u64::from(status.max_slots);
                    allowed_profiles.get_or_insert(status.allowed_profiles);
                }
                Err(e) => {
                    log::warn!("Status of node {} unavailable: {}", node.node_id(), e);
                    unreachable.push(node.node_id().to_string());
                }
            }
        }

        ClusterStatus {
            tier: self.registry.tier().name.clone(),
            total_nodes: nodes.len(),
            active_slots,
            max_slots,
            utilization_percent: utilization_percent(active_slots, max_slots),
            allowed_profiles: allowed_profiles.unwrap_or_default(),
            unreachable,
        }
    }
}
