//! # Tier Control Plane
//!
//! Interactive console over a registry of nodes. In-process nodes are created
//! from the configured tier; nodes running as `tier_node` elsewhere are attached
//! with `--remote ID=ws://host:port/ws`. Commands typed at the prompt are
//! broadcast to every node with free capacity, and every attempt lands in the
//! audit log, which is also streamed to the structured log file.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use lib_admission::{
    AuditLog, Broadcaster, Command, NodeRegistry, NodeStatus, NodeTemplate, SimulatedWork, StatusAggregator, TierConfig,
};

#[allow(dead_code)]
mod tier_logic;
use tier_logic::console::{self, ConsoleCommand};
use tier_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    logger::load_dotenv();

    let config = config::load_layered(config::ControlConfig::parse())?;

    let log_dir = config.log_dir.clone().unwrap_or_else(|| "logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = logger::setup_logging(&log_dir, &log_level, "tier_control")?;

    let tier = config.tier.tier_config();
    let template = NodeTemplate {
        tier: tier.clone(),
        work: Arc::new(SimulatedWork::new(config.tier.work_delay())),
        history_capacity: config.tier.history_capacity(),
    };
    let registry = Arc::new(NodeRegistry::new(
        config.registry_capacity.unwrap_or(lib_admission::registry::DEFAULT_REGISTRY_CAPACITY),
        template,
    ));

    for node_id in config.nodes.iter().flatten() {
        if let Err(e) = config::validate_node_id(node_id, &tier.name) {
            warn!("Skipping node {}: {}", node_id, e);
            continue;
        }
        if let Err(e) = registry.register(node_id) {
            warn!("Could not register node {}: {}", node_id, e);
        }
    }

    for entry in config.remotes.iter().flatten() {
        match config::parse_remote_node(entry, &tier.name) {
            Ok((node_id, url)) => {
                if let Err(e) = registry.register_remote(&node_id, &url) {
                    warn!("Could not register remote node {}: {}", node_id, e);
                }
            }
            Err(e) => warn!("Skipping remote node {}: {}", entry, e),
        }
    }

    let (audit, mut audit_rx) =
        AuditLog::with_sink(config.audit_capacity.unwrap_or(lib_admission::audit::DEFAULT_AUDIT_CAPACITY));

    let audit_writer = tokio::spawn(async move {
        while let Some(entry) = audit_rx.recv().await {
            match serde_json::to_string(&entry) {
                Ok(line) => info!(target: "audit", node = %entry.node_id, action = %entry.command.action, "{}", line),
                Err(e) => error!("Failed to serialize audit entry: {}", e),
            }
        }
    });

    let broadcaster = Broadcaster::new(registry.clone(), Arc::new(audit));
    let aggregator = StatusAggregator::new(registry.clone());

    println!("{}", console::render_banner(&tier));
    info!("Control plane ready with {} nodes", registry.len());

    run_console(&tier, &broadcaster, &aggregator).await;

    // Closing the audit sink lets the writer drain and exit.
    drop(broadcaster);
    drop(aggregator);
    drop(registry);
    if tokio::time::timeout(Duration::from_secs(5), audit_writer).await.is_err() {
        warn!("Audit writer did not finish in time");
    }

    info!("Bye!");
    Ok(())
}

async fn run_console(tier: &TierConfig, broadcaster: &Broadcaster, aggregator: &StatusAggregator) {
    let prompt = format!("\n{}{}", tier.name, console::PROMPT_SUFFIX);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}", prompt);
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = signal::ctrl_c() => {
                println!("\n\nExiting {} control plane...", tier.display_name());
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {}", e);
                break;
            }
        };

        match console::parse_line(&line) {
            ConsoleCommand::Exit => break,
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => println!("\n{}", console::render_help()),
            ConsoleCommand::Status => {
                let status = aggregator.status().await;
                println!("\n{}", console::render_status(&status, tier));
            }
            ConsoleCommand::Nodes => {
                let mut nodes: Vec<(String, Result<NodeStatus, String>)> = Vec::new();
                for node in broadcaster.registry().snapshot() {
                    let status = node.status().await.map_err(|e| e.to_string());
                    nodes.push((node.node_id().to_string(), status));
                }
                println!("\n{}", console::render_nodes(&nodes));
            }
            ConsoleCommand::Process { profile, prompt } => {
                let command = build_command(tier, "process", profile, prompt);
                let results = broadcaster.dispatch(&command).await;
                println!("\n{}", console::render_results(&results));
            }
            ConsoleCommand::Mirror { profile, prompt } => {
                let command = build_command(tier, lib_admission::tier::MIRROR_ACTION, profile, prompt);
                let results = broadcaster.dispatch(&command).await;
                println!("\n{}", console::render_results(&results));
            }
            ConsoleCommand::Audit(n) => {
                println!("\n{}", console::render_audit(&broadcaster.audit().recent(n)));
            }
            ConsoleCommand::Unknown(_) => println!("{}", console::render_unknown()),
        }
    }
}

/// Commands default to the tier's first allowed profile and carry the tier label.
fn build_command(tier: &TierConfig, action: &str, profile: Option<String>, prompt: String) -> Command {
    let profile = profile
        .or_else(|| tier.allowed_profiles.iter().next().cloned())
        .unwrap_or_default();
    Command::new(action, &profile)
        .with_payload(prompt)
        .with_extra("tier", json!(tier.name))
}
