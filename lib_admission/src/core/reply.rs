//! # Node Replies
//!
//! The outcome of one command on one node, in the shape it travels on the wire.
//! Replies are untagged JSON objects; which variant a reply is follows from the
//! fields it carries.

use serde::{Deserialize, Serialize};

/// Current time as an RFC 3339 string, the timestamp format used across replies,
/// history and the audit log.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Work was admitted and completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Processed {
    /// Node that ran the work.
    pub node: String,
    /// Tier label of that node.
    pub tier: String,
    /// Output of the work operation.
    pub result: String,
    /// Completion time.
    pub timestamp: String,
    /// Slots in use on the node while this work held its slot, itself included.
    pub slots_used: u32,
    /// The node's slot limit.
    pub max_slots: u32,
}

/// The quota policy turned the command away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    /// `"<Tier> tier limit exceeded"`.
    pub error: String,
    /// Node that rejected the command.
    pub node: String,
    /// Tier label of that node.
    pub tier: String,
    /// The first rule that failed.
    pub reason: String,
}

/// Malformed input, a failed work operation, or an unreachable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failed {
    /// Human-readable failure.
    pub error: String,
    /// Node the failure is attributed to.
    pub node: String,
    /// Tier label, when the failure happened past admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// # Node Reply
///
/// One reply per inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeReply {
    /// Admitted and completed.
    Processed(Processed),
    /// Turned away by policy.
    Rejected(Rejected),
    /// Anything else that went wrong.
    Failed(Failed),
}

impl NodeReply {
    /// A failure not tied to a tier (bad input, transport trouble).
    pub fn failure(node: &str, error: impl Into<String>) -> Self {
        NodeReply::Failed(Failed {
            error: error.into(),
            node: node.to_string(),
            tier: None,
        })
    }

    /// The reply to an inbound message that is not a valid command.
    pub fn invalid_json(node: &str, detail: impl std::fmt::Display) -> Self {
        Self::failure(node, format!("Invalid JSON: {}", detail))
    }

    /// Node the reply came from.
    pub fn node(&self) -> &str {
        match self {
            NodeReply::Processed(p) => &p.node,
            NodeReply::Rejected(r) => &r.node,
            NodeReply::Failed(f) => &f.node,
        }
    }

    /// `true` when the work ran to completion.
    pub fn is_processed(&self) -> bool {
        matches!(self, NodeReply::Processed(_))
    }

    /// `true` when the policy rejected the command.
    pub fn is_rejected(&self) -> bool {
        matches!(self, NodeReply::Rejected(_))
    }

    /// The error text for rejections and failures.
    pub fn error(&self) -> Option<&str> {
        match self {
            NodeReply::Processed(_) => None,
            NodeReply::Rejected(r) => Some(&r.error),
            NodeReply::Failed(f) => Some(&f.error),
        }
    }

    /// The work result for processed replies.
    pub fn result(&self) -> Option<&str> {
        match self {
            NodeReply::Processed(p) => Some(&p.result),
            _ => None,
        }
    }
}
