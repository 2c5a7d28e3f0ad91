//! # Core Admission Module
//!
//! This module forms the heart of the admission-control fabric. It holds the
//! rules that decide whether work may enter a node, the slot accounting that has
//! to stay correct under concurrent requests, and the fan-out that sends one
//! command to every eligible node and gathers the replies.
//!
//! ## Core Components:
//!
//! - **`tier`**: the immutable quota bundle (`TierConfig`) and the `Command` a
//!   caller submits.
//!
//! - **`quota_policy`**: the pure admit/reject decision, first failing rule wins.
//!
//! - **`slot_ledger`**: per-node counters with a single-step check-and-reserve
//!   and scoped release through `SlotToken`.
//!
//! - **`node_service`**: one node. Runs admitted work, keeps a bounded history,
//!   tracks open connections.
//!
//! - **`registry`**: the control plane's capped, ordered directory of nodes,
//!   local or remote.
//!
//! - **`broadcaster`**: fan-out with a headroom pre-filter and audit trail.
//!
//! - **`audit`**: the bounded audit ring with an optional streaming sink.
//!
//! - **`status`**: cluster-wide utilization computed on demand.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Tier quotas and commands.
pub mod tier;
/// The stateless admission decision.
pub mod quota_policy;
/// Per-node slot and mirror accounting.
pub mod slot_ledger;
/// The opaque work run for admitted commands.
pub mod work;
/// Reply payloads.
pub mod reply;
/// A single node service.
pub mod node_service;
/// The control plane's node directory.
pub mod registry;
/// The bounded audit log.
pub mod audit;
/// Fan-out dispatch.
pub mod broadcaster;
/// Cluster-wide utilization.
pub mod status;

// --- Public API Re-exports ---
pub use audit::{AuditEntry, AuditLog};
pub use broadcaster::Broadcaster;
pub use node_service::{ConnectionGuard, HistoryEntry, HistoryKind, MessageReply, NodeService, NodeStatus};
pub use quota_policy::{QuotaPolicy, Rejection};
pub use registry::{NodeLink, NodeRegistry, NodeTemplate, RegistryError};
pub use reply::NodeReply;
pub use slot_ledger::{LedgerSnapshot, SlotLedger, SlotToken};
pub use status::{ClusterStatus, StatusAggregator};
pub use tier::{Command, TierConfig};
pub use work::{SimulatedWork, WorkError, WorkOperation};
