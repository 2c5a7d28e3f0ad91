//! # Audit Log
//!
//! Every dispatch attempt the broadcaster makes produces one `AuditEntry`. The
//! log keeps the newest entries in a fixed-size ring so that memory stays bounded
//! however long the control plane runs. Consumers that need every entry (a file
//! writer, a database, a metrics pipeline) attach a sink and receive entries over
//! an unbounded channel as they are produced.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::reply::{now_timestamp, NodeReply};
use crate::core::tier::Command;

/// Ring capacity used unless configured otherwise.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// One command sent to one node, and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the reply was recorded.
    pub timestamp: String,
    /// The command as dispatched.
    pub command: Command,
    /// The node it went to.
    pub node_id: String,
    /// The node's reply.
    pub result: NodeReply,
}

impl AuditEntry {
    /// Records `result` from `node_id` for `command`, stamped now.
    pub fn new(command: &Command, node_id: &str, result: &NodeReply) -> Self {
        Self {
            timestamp: now_timestamp(),
            command: command.clone(),
            node_id: node_id.to_string(),
            result: result.clone(),
        }
    }
}

struct AuditRing {
    entries: VecDeque<AuditEntry>,
    total: u64,
}

/// # Audit Log
pub struct AuditLog {
    capacity: usize,
    ring: Mutex<AuditRing>,
    sink: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditLog {
    /// A log keeping the newest `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(AuditRing {
                entries: VecDeque::new(),
                total: 0,
            }),
            sink: None,
        }
    }

    /// A log that also streams every entry to the returned receiver.
    pub fn with_sink(capacity: usize) -> (Self, mpsc::UnboundedReceiver<AuditEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut log = Self::new(capacity);
        log.sink = Some(tx);
        (log, rx)
    }

    fn lock(&self) -> MutexGuard<'_, AuditRing> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an entry, evicting the oldest when the ring is full.
    pub fn append(&self, entry: AuditEntry) {
        if let Some(sink) = &self.sink {
            // A dropped receiver just means nobody is listening any more.
            if sink.send(entry.clone()).is_err() {
                log::debug!("Audit sink closed; entry kept in ring only");
            }
        }

        let mut ring = self.lock();
        if ring.entries.len() == self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(entry);
        ring.total += 1;
    }

    /// Entries currently held, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let ring = self.lock();
        let skip = ring.entries.len().saturating_sub(n);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries currently held.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// `true` when nothing has been held yet or everything was evicted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ever appended, evicted ones included.
    pub fn total_appended(&self) -> u64 {
        self.lock().total
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: usize) -> AuditEntry {
        AuditEntry::new(
            &Command::new("process", "p1").with_payload(format!("job-{}", i)),
            "PUBLIC-001",
            &NodeReply::failure("PUBLIC-001", "n/a"),
        )
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.append(entry(i));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total_appended(), 5);
        let payloads: Vec<String> = log.entries().into_iter().map(|e| e.command.payload).collect();
        assert_eq!(payloads, vec!["job-2", "job-3", "job-4"]);
        assert_eq!(log.recent(1)[0].command.payload, "job-4");
        assert_eq!(log.recent(10).len(), 3);
    }

    #[test]
    fn test_sink_receives_every_entry() {
        let (log, mut rx) = AuditLog::with_sink(1);
        for i in 0..3 {
            log.append(entry(i));
        }
        let mut seen = Vec::new();
        while let Ok(e) = rx.try_recv() {
            seen.push(e.command.payload);
        }
        assert_eq!(seen, vec!["job-0", "job-1", "job-2"]);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_closed_sink_does_not_block_appends() {
        let (log, rx) = AuditLog::with_sink(4);
        drop(rx);
        log.append(entry(0));
        assert_eq!(log.len(), 1);
    }
}
