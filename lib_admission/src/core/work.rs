//! # Work Operations
//!
//! The work a node performs for an admitted command is supplied from outside the
//! core. The node only needs to know that it eventually completes or fails; what it
//! does (inference, generation, a simple delay) is opaque.

use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::core::tier::Command;

/// A failure reported by a work operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct WorkError(pub String);

impl WorkError {
    /// Wraps any displayable failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// # Work Operation
///
/// The externally supplied unit of work run for each admitted command. It is
/// shared by every connection on a node, so implementations take `&self`.
pub trait WorkOperation: Send + Sync {
    /// Runs the work for `command` on node `node_id` and returns the result text.
    fn run<'a>(&'a self, node_id: &'a str, command: &'a Command) -> BoxFuture<'a, Result<String, WorkError>>;
}

/// Sleeps for a fixed delay and reports the action as processed. This is the
/// stand-in work used by the node and control binaries.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    /// Creates simulated work that takes `delay` to finish.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl WorkOperation for SimulatedWork {
    fn run<'a>(&'a self, _node_id: &'a str, command: &'a Command) -> BoxFuture<'a, Result<String, WorkError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(format!("Processed: {}", command.action))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_work_reports_action() {
        let work = SimulatedWork::default();
        let cmd = Command::new("process", "logos9.5");
        let started = tokio::time::Instant::now();
        let out = work.run("PUBLIC-001", &cmd).await;
        assert_eq!(out, Ok("Processed: process".to_string()));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
