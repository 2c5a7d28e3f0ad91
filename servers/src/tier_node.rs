//! # Tier Node Server
//!
//! Runs one node service behind a WebSocket. Each inbound JSON command is
//! checked against the tier's quotas, run through the work operation when
//! admitted, and answered on the same connection.
//!
//! ## Endpoints:
//! - **`/ws`**: JSON commands in, one JSON reply per command out, in order.
//!   `{"action": "status"}` returns the node's live status.
//! - **`/status`**: the node status as JSON over plain HTTP.
//! - **`/health`**: liveness probe.
//!
//! Configuration is layered defaults < `tier_node.conf` (JSON) < env / CLI. The
//! listening port is derived from the node id unless `--port` is given.
//! Shutdown is graceful through `tokio-graceful`: open connections get up to
//! ten seconds to finish their current command.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tracing::{error, info};

use lib_admission::transport;
use lib_admission::{NodeService, SimulatedWork};

#[allow(dead_code)]
mod tier_logic;
use tier_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    logger::load_dotenv();

    let config = config::load_layered(config::NodeConfig::parse())?;

    let log_dir = config.log_dir.clone().unwrap_or_else(|| "logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = logger::setup_logging(&log_dir, &log_level, "tier_node")?;

    let tier = config.tier.tier_config();
    let node_id = config
        .node_id
        .clone()
        .ok_or_else(|| anyhow!("A node id is required, e.g. `tier_node {}-001`", tier.name))?;
    config::validate_node_id(&node_id, &tier.name)?;

    let host = config.host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = config.port.unwrap_or_else(|| config::derive_port(&node_id));
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let node = Arc::new(
        NodeService::new(&node_id, tier, Arc::new(SimulatedWork::new(config.tier.work_delay())))
            .with_history_capacity(config.tier.history_capacity()),
    );
    info!(
        "Node {} on tier {}: {} slots, {} mirrors, context {}",
        node_id,
        node.tier().name,
        node.tier().max_slots,
        node.tier().max_mirrors,
        node.tier().max_context
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = Shutdown::default();

    shutdown.spawn_task_fn(move |guard| async move {
        let stop = async move { guard.cancelled().await };
        if let Err(e) = transport::serve(listener, node, stop).await {
            error!("Server error: {}", e);
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!("shutdown: gracefully {}s after shutdown signal received", elapsed.as_secs_f64());
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}
