//! # Control Console
//!
//! Line parser and renderers for the interactive control plane. Parsing and
//! rendering are pure so the REPL loop in `tier_control` stays a thin shell
//! around them.

use colored::*;
use lib_admission::{AuditEntry, ClusterStatus, NodeReply, NodeStatus, TierConfig};

pub const PROMPT_SUFFIX: &str = "> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    Nodes,
    /// `process [@profile] <prompt>`
    Process { profile: Option<String>, prompt: String },
    /// `mirror [@profile] <prompt>`
    Mirror { profile: Option<String>, prompt: String },
    Audit(usize),
    Help,
    Exit,
    Empty,
    Unknown(String),
}

pub const DEFAULT_AUDIT_LINES: usize = 10;

/// Parses one console line. Keywords are case-insensitive; prompts are kept verbatim.
pub fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };

    match head.to_lowercase().as_str() {
        "exit" | "quit" => ConsoleCommand::Exit,
        "status" => ConsoleCommand::Status,
        "nodes" => ConsoleCommand::Nodes,
        "help" => ConsoleCommand::Help,
        "audit" if rest.is_empty() => ConsoleCommand::Audit(DEFAULT_AUDIT_LINES),
        "audit" => match rest.parse::<usize>() {
            Ok(n) => ConsoleCommand::Audit(n),
            Err(_) => ConsoleCommand::Unknown(line.to_string()),
        },
        "process" if !rest.is_empty() => {
            let (profile, prompt) = split_profile(rest);
            ConsoleCommand::Process { profile, prompt }
        }
        "mirror" if !rest.is_empty() => {
            let (profile, prompt) = split_profile(rest);
            ConsoleCommand::Mirror { profile, prompt }
        }
        _ => ConsoleCommand::Unknown(line.to_string()),
    }
}

fn split_profile(rest: &str) -> (Option<String>, String) {
    match rest.strip_prefix('@') {
        Some(tagged) => match tagged.split_once(char::is_whitespace) {
            Some((profile, prompt)) => (Some(profile.to_string()), prompt.trim().to_string()),
            None => (Some(tagged.to_string()), String::new()),
        },
        None => (None, rest.to_string()),
    }
}

pub fn render_banner(tier: &TierConfig) -> String {
    let rule = "=".repeat(60);
    let profiles: Vec<&str> = tier.allowed_profiles.iter().map(String::as_str).collect();
    format!(
        "\n{rule}\n{}\n{rule}\n{} Tier Limits:\n- {} MAX slots per node\n- Controlled mirroring (max {})\n- Profiles: {}\n- {} context window\n{rule}",
        format!("{} TIER CONTROL PLANE", tier.name).bold(),
        tier.display_name(),
        tier.max_slots,
        tier.max_mirrors,
        profiles.join(", "),
        tier.max_context,
    )
}

pub fn render_help() -> String {
    [
        "Available Commands:".bold().to_string(),
        "status                     - Show tier status".to_string(),
        "nodes                      - List registered nodes".to_string(),
        "process [@profile] <text>  - Process a task on every node with headroom".to_string(),
        "mirror [@profile] <text>   - Mirror a task on every node with headroom".to_string(),
        format!("audit [n]                  - Show the last n audit entries (default {})", DEFAULT_AUDIT_LINES),
        "exit | quit                - Exit the control plane".to_string(),
    ]
    .join("\n")
}

pub fn render_status(status: &ClusterStatus, tier: &TierConfig) -> String {
    let mut out = vec![
        format!("{} Tier Status:", tier.display_name()).bold().to_string(),
        format!("Nodes: {}", status.total_nodes),
        format!("Active Slots: {}/{}", status.active_slots, status.max_slots),
        format!("Utilization: {:.1}%", status.utilization_percent),
        format!("Allowed Profiles: {}", status.allowed_profiles.join(", ")),
    ];
    if !status.unreachable.is_empty() {
        out.push(format!("Unreachable: {}", status.unreachable.join(", ")).yellow().to_string());
    }
    out.join("\n")
}

/// One line per node; nodes whose status could not be read carry the error.
pub fn render_nodes(nodes: &[(String, Result<NodeStatus, String>)]) -> String {
    if nodes.is_empty() {
        return "No nodes registered.".yellow().to_string();
    }
    let mut out = vec!["Registered Nodes:".bold().to_string()];
    for (node_id, status) in nodes {
        match status {
            Ok(s) => out.push(format!(
                "- {}: slots {}/{} mirrors {}/{} connections {}",
                node_id, s.active_slots, s.max_slots, s.mirror_count, s.max_mirrors, s.connections
            )),
            Err(e) => out.push(format!("- {}: {}", node_id, format!("unreachable ({})", e).red())),
        }
    }
    out.join("\n")
}

pub fn render_results(results: &[NodeReply]) -> String {
    if results.is_empty() {
        return "No node had free capacity.".yellow().to_string();
    }
    let mut out = vec!["Processing Results:".bold().to_string()];
    for reply in results {
        let line = match reply {
            NodeReply::Processed(p) => format!("{}", p.result.green()),
            NodeReply::Rejected(r) => format!("{}", format!("{} ({})", r.error, r.reason).yellow()),
            NodeReply::Failed(f) => format!("{}", f.error.red()),
        };
        out.push(format!("- {}: {}", reply.node(), line));
    }
    out.join("\n")
}

pub fn render_audit(entries: &[AuditEntry]) -> String {
    if entries.is_empty() {
        return "Audit log is empty.".to_string();
    }
    entries
        .iter()
        .map(|e| {
            let outcome = match &e.result {
                NodeReply::Processed(_) => "processed".green(),
                NodeReply::Rejected(_) => "rejected".yellow(),
                NodeReply::Failed(_) => "failed".red(),
            };
            format!("{} {} {} {}", e.timestamp.dimmed(), e.node_id, e.command.action, outcome)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_unknown() -> String {
    "Unknown command. Type 'help' for available commands.".red().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_admission::Command;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(parse_line("  STATUS "), ConsoleCommand::Status);
        assert_eq!(parse_line("quit"), ConsoleCommand::Exit);
        assert_eq!(parse_line("exit"), ConsoleCommand::Exit);
        assert_eq!(parse_line("nodes"), ConsoleCommand::Nodes);
        assert_eq!(parse_line(""), ConsoleCommand::Empty);
        assert_eq!(parse_line("audit"), ConsoleCommand::Audit(DEFAULT_AUDIT_LINES));
        assert_eq!(parse_line("audit 3"), ConsoleCommand::Audit(3));
        assert!(matches!(parse_line("audit many"), ConsoleCommand::Unknown(_)));
        assert!(matches!(parse_line("process"), ConsoleCommand::Unknown(_)));
        assert!(matches!(parse_line("frobnicate"), ConsoleCommand::Unknown(_)));
    }

    #[test]
    fn test_parse_process_with_and_without_profile() {
        assert_eq!(
            parse_line("process Summarize  this text"),
            ConsoleCommand::Process {
                profile: None,
                prompt: "Summarize  this text".into()
            }
        );
        assert_eq!(
            parse_line("mirror @logos9.5 copy me"),
            ConsoleCommand::Mirror {
                profile: Some("logos9.5".into()),
                prompt: "copy me".into()
            }
        );
    }

    #[test]
    fn test_render_status_and_results() {
        plain();
        let tier = TierConfig::public();
        let status = ClusterStatus {
            tier: "PUBLIC".into(),
            total_nodes: 3,
            active_slots: 2,
            max_slots: 1200,
            utilization_percent: 2.0 / 12.0,
            allowed_profiles: vec!["logos9.5".into()],
            unreachable: vec!["PUBLIC-009".into()],
        };
        let text = render_status(&status, &tier);
        assert!(text.contains("Public Tier Status:"));
        assert!(text.contains("Active Slots: 2/1200"));
        assert!(text.contains("Utilization: 0.2%"));
        assert!(text.contains("Unreachable: PUBLIC-009"));

        let results = render_results(&[NodeReply::failure("PUBLIC-002", "connection refused")]);
        assert!(results.contains("- PUBLIC-002: connection refused"));
        assert!(render_results(&[]).contains("No node had free capacity"));
    }

    #[test]
    fn test_render_audit() {
        plain();
        let entry = AuditEntry::new(
            &Command::new("process", "logos9.5"),
            "PUBLIC-001",
            &NodeReply::failure("PUBLIC-001", "boom"),
        );
        let text = render_audit(&[entry]);
        assert!(text.contains("PUBLIC-001 process failed"));
        assert_eq!(render_audit(&[]), "Audit log is empty.");
    }
}
