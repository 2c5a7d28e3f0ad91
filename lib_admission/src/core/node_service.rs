//! # Node Service
//!
//! A single worker node: one tier, one ledger, one work operation. The node
//! decides locally whether a command may enter, runs the admitted work while
//! holding a slot, and keeps a bounded history of what it saw.
//!
//! Per command the node moves through
//! `Received -> Admitted -> Running -> {Completed | Failed} -> SlotReleased`,
//! or straight from `Received` to `Rejected` without ever taking a slot.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::quota_policy::QuotaPolicy;
use crate::core::reply::{now_timestamp, Failed, NodeReply, Processed, Rejected};
use crate::core::slot_ledger::{LedgerSnapshot, SlotLedger};
use crate::core::tier::{Command, TierConfig};
use crate::core::work::WorkOperation;

/// History cap used when none is configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryKind {
    /// An inbound command.
    Received,
    /// A completed unit of work.
    Processed,
    /// A policy rejection.
    Rejected,
    /// A failed unit of work.
    Error,
}

/// One line of a node's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the entry was written.
    pub timestamp: String,
    /// What it records.
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    /// The command or reply, as JSON.
    pub content: Value,
    /// The node that wrote it.
    pub node: String,
}

/// A node's self-reported state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Node identifier.
    pub node_id: String,
    /// Tier label.
    pub tier: String,
    /// Slots in use.
    pub active_slots: u32,
    /// Slot limit.
    pub max_slots: u32,
    /// Mirrors in use.
    pub mirror_count: u32,
    /// Mirror limit.
    pub max_mirrors: u32,
    /// Context limit of the tier.
    pub max_context: u32,
    /// Open connections.
    pub connections: usize,
    /// Profiles the tier allows.
    pub allowed_profiles: Vec<String>,
}

impl NodeStatus {
    /// `true` while at least one slot is free.
    pub fn has_headroom(&self) -> bool {
        self.active_slots < self.max_slots
    }
}

/// Reply to one inbound wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
    /// The outcome of a command.
    Command(NodeReply),
    /// The answer to a `status` query.
    Status(NodeStatus),
}

/// # Node Service
///
/// Owns the node's ledger and history. Shared behind an `Arc` by every
/// connection and by the control plane in in-process deployments.
pub struct NodeService {
    node_id: String,
    tier: TierConfig,
    policy: QuotaPolicy,
    ledger: SlotLedger,
    work: Arc<dyn WorkOperation>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_capacity: usize,
    connections: Mutex<BTreeMap<u64, String>>,
    next_connection_id: AtomicU64,
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("node_id", &self.node_id)
            .field("tier", &self.tier.name)
            .field("ledger", &self.ledger.snapshot())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NodeService {
    /// Creates a node with an empty ledger and the default history cap.
    pub fn new(node_id: &str, tier: TierConfig, work: Arc<dyn WorkOperation>) -> Self {
        Self {
            node_id: node_id.to_string(),
            ledger: SlotLedger::for_tier(&tier),
            tier,
            policy: QuotaPolicy,
            work,
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            connections: Mutex::new(BTreeMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Sets the history cap. A cap of `H` keeps the newest `H / 2` entries once
    /// more than `H` have accumulated.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Node identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The node's tier.
    pub fn tier(&self) -> &TierConfig {
        &self.tier
    }

    /// The node's ledger.
    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    /// Current ledger counters.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// # Process
    ///
    /// Admits or rejects `command`. Admitted work runs while holding a slot; the
    /// slot is released once the work finishes, whatever the outcome. Failures of
    /// the work operation become a failed reply and never escape.
    pub async fn process(&self, command: &Command) -> NodeReply {
        self.record(HistoryKind::Received, serde_json::to_value(command).unwrap_or(Value::Null));

        let token = match self.ledger.try_admit(&self.policy, &self.tier, command) {
            Ok(token) => token,
            Err(rejection) => {
                log::warn!("Node {} rejected '{}': {}", self.node_id, command.action, rejection);
                let reply = NodeReply::Rejected(Rejected {
                    error: self.tier.limit_exceeded_message(),
                    node: self.node_id.clone(),
                    tier: self.tier.name.clone(),
                    reason: rejection.to_string(),
                });
                self.record_reply(HistoryKind::Rejected, &reply);
                return reply;
            }
        };

        let outcome = self.work.run(&self.node_id, command).await;
        let slots_used = self.ledger.active_slots();
        drop(token);

        let (kind, reply) = match outcome {
            Ok(result) => (
                HistoryKind::Processed,
                NodeReply::Processed(Processed {
                    node: self.node_id.clone(),
                    tier: self.tier.name.clone(),
                    result,
                    timestamp: now_timestamp(),
                    slots_used,
                    max_slots: self.tier.max_slots,
                }),
            ),
            Err(e) => {
                log::error!("Node {} work failed for '{}': {}", self.node_id, command.action, e);
                (
                    HistoryKind::Error,
                    NodeReply::Failed(Failed {
                        error: e.to_string(),
                        node: self.node_id.clone(),
                        tier: Some(self.tier.name.clone()),
                    }),
                )
            }
        };
        self.record_reply(kind, &reply);
        reply
    }

    /// # Handle Message
    ///
    /// Decodes one inbound wire message and produces the reply to send back.
    /// A `status` action is answered with the node's status; anything that is not
    /// a valid command gets an `Invalid JSON` failure. The connection stays usable
    /// in every case.
    pub async fn handle_message(&self, text: &str) -> MessageReply {
        let command: Command = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Node {} received malformed message: {}", self.node_id, e);
                return MessageReply::Command(NodeReply::invalid_json(&self.node_id, e));
            }
        };

        if command.is_status_query() {
            return MessageReply::Status(self.status());
        }
        MessageReply::Command(self.process(&command).await)
    }

    /// The node's current state.
    pub fn status(&self) -> NodeStatus {
        let snapshot = self.ledger.snapshot();
        NodeStatus {
            node_id: self.node_id.clone(),
            tier: self.tier.name.clone(),
            active_slots: snapshot.active_slots,
            max_slots: self.tier.max_slots,
            mirror_count: snapshot.mirror_count,
            max_mirrors: self.tier.max_mirrors,
            max_context: self.tier.max_context,
            connections: self.connection_count(),
            allowed_profiles: self.tier.allowed_profiles.iter().cloned().collect(),
        }
    }

    fn record_reply(&self, kind: HistoryKind, reply: &NodeReply) {
        self.record(kind, serde_json::to_value(reply).unwrap_or(Value::Null));
    }

    fn record(&self, kind: HistoryKind, content: Value) {
        let entry = HistoryEntry {
            timestamp: now_timestamp(),
            kind,
            content,
            node: self.node_id.clone(),
        };
        let mut history = lock(&self.history);
        history.push_back(entry);
        if history.len() > self.history_capacity {
            let keep = self.history_capacity / 2;
            let excess = history.len() - keep;
            history.drain(..excess);
        }
    }

    /// A copy of the message history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Number of history entries held.
    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    /// Registers an open connection from `peer`. The connection counts as open
    /// until the returned guard is dropped.
    pub fn open_connection(&self, peer: impl Into<String>) -> ConnectionGuard<'_> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let peer = peer.into();
        log::info!("Node {}: connection {} established from {}", self.node_id, id, peer);
        lock(&self.connections).insert(id, peer);
        ConnectionGuard { node: self, id }
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }
}

/// Keeps a connection in its node's open set while alive.
#[must_use = "dropping the guard closes the connection entry immediately"]
pub struct ConnectionGuard<'a> {
    node: &'a NodeService,
    id: u64,
}

impl ConnectionGuard<'_> {
    /// The connection's identifier within its node.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if lock(&self.node.connections).remove(&self.id).is_some() {
            log::info!("Node {}: connection {} closed", self.node.node_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::work::{SimulatedWork, WorkError};
    use futures_util::future::BoxFuture;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingWork;

    impl WorkOperation for FailingWork {
        fn run<'a>(&'a self, _node_id: &'a str, _command: &'a Command) -> BoxFuture<'a, Result<String, WorkError>> {
            Box::pin(async { Err(WorkError::new("model crashed")) })
        }
    }

    /// Blocks until released, so tests can hold slots open.
    struct GatedWork {
        gate: Arc<Notify>,
    }

    impl WorkOperation for GatedWork {
        fn run<'a>(&'a self, _node_id: &'a str, command: &'a Command) -> BoxFuture<'a, Result<String, WorkError>> {
            Box::pin(async move {
                self.gate.notified().await;
                Ok(format!("Processed: {}", command.action))
            })
        }
    }

    fn tier(max_slots: u32, max_mirrors: u32) -> TierConfig {
        TierConfig::new("PUBLIC", max_slots, 8192, ["p1"], max_mirrors)
    }

    fn node(max_slots: u32, max_mirrors: u32) -> NodeService {
        NodeService::new("PUBLIC-001", tier(max_slots, max_mirrors), Arc::new(SimulatedWork::new(Duration::from_millis(1))))
    }

    #[tokio::test]
    async fn test_process_admits_and_releases() {
        let node = node(2, 1);
        let reply = node.process(&Command::new("process", "p1")).await;
        match reply {
            NodeReply::Processed(p) => {
                assert_eq!(p.node, "PUBLIC-001");
                assert_eq!(p.tier, "PUBLIC");
                assert_eq!(p.result, "Processed: process");
                assert_eq!(p.slots_used, 1);
                assert_eq!(p.max_slots, 2);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(node.snapshot(), LedgerSnapshot::default());

        let kinds: Vec<_> = node.history().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![HistoryKind::Received, HistoryKind::Processed]);
    }

    #[tokio::test]
    async fn test_rejection_never_takes_a_slot() {
        let node = node(2, 1);
        let reply = node.process(&Command::new("process", "not-allowed")).await;
        match &reply {
            NodeReply::Rejected(r) => {
                assert_eq!(r.error, "Public tier limit exceeded");
                assert_eq!(r.reason, "profile not-allowed not allowed");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(node.ledger().active_slots(), 0);
    }

    #[tokio::test]
    async fn test_work_failure_still_releases_slot() {
        let node = NodeService::new("PUBLIC-001", tier(1, 1), Arc::new(FailingWork));
        let reply = node.process(&Command::new("process", "p1")).await;
        assert_eq!(reply.error(), Some("model crashed"));
        assert_eq!(node.ledger().active_slots(), 0);
        assert_eq!(node.history().last().map(|e| e.kind), Some(HistoryKind::Error));

        // The slot is free again for the next command.
        let again = node.process(&Command::new("process", "p1")).await;
        assert!(!again.is_rejected());
    }

    #[tokio::test]
    async fn test_sequential_mirrors_succeed_with_single_mirror() {
        let node = node(2, 1);
        let first = node.process(&Command::new("mirror", "p1")).await;
        let second = node.process(&Command::new("mirror", "p1")).await;
        assert!(first.is_processed());
        assert!(second.is_processed());
        assert_eq!(node.ledger().mirror_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_mirror_over_limit_rejected() {
        let gate = Arc::new(Notify::new());
        let node = Arc::new(NodeService::new("PUBLIC-001", tier(4, 1), Arc::new(GatedWork { gate: gate.clone() })));

        let running = {
            let node = node.clone();
            tokio::spawn(async move { node.process(&Command::new("mirror", "p1")).await })
        };
        while node.ledger().mirror_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = node.process(&Command::new("mirror", "p1")).await;
        match second {
            NodeReply::Rejected(r) => assert!(r.reason.starts_with("mirroring limit reached")),
            other => panic!("unexpected reply: {:?}", other),
        }

        gate.notify_one();
        assert!(running.await.unwrap().is_processed());
        assert_eq!(node.snapshot(), LedgerSnapshot::default());
    }

    #[tokio::test]
    async fn test_cancelled_work_releases_slot() {
        let gate = Arc::new(Notify::new());
        let node = Arc::new(NodeService::new("PUBLIC-001", tier(1, 1), Arc::new(GatedWork { gate })));

        let task = {
            let node = node.clone();
            tokio::spawn(async move { node.process(&Command::new("process", "p1")).await })
        };
        while node.ledger().active_slots() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(node.ledger().active_slots(), 0);
    }

    #[tokio::test]
    async fn test_history_truncates_to_half_capacity() {
        let node = node(4, 1).with_history_capacity(10);
        // Each admitted command writes two entries.
        for _ in 0..5 {
            node.process(&Command::new("process", "p1")).await;
        }
        assert_eq!(node.history_len(), 10);

        node.process(&Command::new("process", "p1")).await;
        // 11th entry overflowed: kept newest 5, then the outcome made it 6.
        assert_eq!(node.history_len(), 6);
        assert_eq!(node.history().last().map(|e| e.kind), Some(HistoryKind::Processed));
    }

    #[tokio::test]
    async fn test_handle_message_variants() {
        let node = node(2, 1);

        match node.handle_message("{not json").await {
            MessageReply::Command(NodeReply::Failed(f)) => {
                assert!(f.error.starts_with("Invalid JSON: "));
                assert_eq!(f.tier, None);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match node.handle_message(r#"{"action":"status","tier":"PUBLIC"}"#).await {
            MessageReply::Status(status) => {
                assert_eq!(status.node_id, "PUBLIC-001");
                assert_eq!(status.max_slots, 2);
                assert_eq!(status.allowed_profiles, vec!["p1".to_string()]);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match node.handle_message(r#"{"action":"process","model":"p1","prompt":"hi"}"#).await {
            MessageReply::Command(reply) => assert!(reply.is_processed()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_connection_guard_tracks_membership() {
        let node = node(1, 1);
        let a = node.open_connection("127.0.0.1:5000");
        let b = node.open_connection("127.0.0.1:5001");
        assert_ne!(a.id(), b.id());
        assert_eq!(node.status().connections, 2);
        drop(a);
        assert_eq!(node.connection_count(), 1);
        drop(b);
        assert_eq!(node.connection_count(), 0);
    }
}
