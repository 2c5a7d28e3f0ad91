use anyhow::{Context, Result, bail};
use clap::{Args, Parser};
use lib_admission::TierConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// First port of the range node ports are derived into.
pub const NODE_PORT_BASE: u16 = 9000;
/// Width of that range.
pub const NODE_PORT_SPAN: u16 = 1000;

/// Quota values and node settings shared by the node and control binaries.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierSettings {
    #[arg(long, env = "TIER_NAME", help = "Tier label applied to every node.")]
    pub tier_name: Option<String>,

    #[arg(long, env = "TIER_MAX_SLOTS", help = "Concurrent work slots per node.")]
    pub max_slots: Option<u32>,

    #[arg(long, env = "TIER_MAX_CONTEXT", help = "Context window limit reported by the tier.")]
    pub max_context: Option<u32>,

    #[arg(long, env = "TIER_ALLOWED_PROFILES", value_delimiter = ',', help = "Comma-separated processing profiles the tier allows.")]
    pub allowed_profiles: Option<Vec<String>>,

    #[arg(long, env = "TIER_MAX_MIRRORS", help = "Concurrent mirror actions per node.")]
    pub max_mirrors: Option<u32>,

    #[arg(long, env = "TIER_HISTORY_CAPACITY", help = "Message history entries kept per node before truncation.")]
    pub history_capacity: Option<usize>,

    #[arg(long, env = "TIER_WORK_DELAY_MS", help = "Duration of the simulated work in milliseconds.")]
    pub work_delay_ms: Option<u64>,
}

impl TierSettings {
    fn defaults() -> Self {
        let public = TierConfig::public();
        TierSettings {
            tier_name: Some(public.name),
            max_slots: Some(public.max_slots),
            max_context: Some(public.max_context),
            allowed_profiles: Some(public.allowed_profiles.into_iter().collect()),
            max_mirrors: Some(public.max_mirrors),
            history_capacity: Some(1000),
            work_delay_ms: Some(100),
        }
    }

    // Merge two settings, where 'other' overrides 'self' for Some values
    fn merge(self, other: TierSettings) -> TierSettings {
        TierSettings {
            tier_name: other.tier_name.or(self.tier_name),
            max_slots: other.max_slots.or(self.max_slots),
            max_context: other.max_context.or(self.max_context),
            allowed_profiles: other.allowed_profiles.or(self.allowed_profiles),
            max_mirrors: other.max_mirrors.or(self.max_mirrors),
            history_capacity: other.history_capacity.or(self.history_capacity),
            work_delay_ms: other.work_delay_ms.or(self.work_delay_ms),
        }
    }

    /// The tier these settings describe. Unset values fall back to the public tier.
    pub fn tier_config(&self) -> TierConfig {
        let public = TierConfig::public();
        let profiles = self
            .allowed_profiles
            .clone()
            .unwrap_or_else(|| public.allowed_profiles.iter().cloned().collect());
        TierConfig::new(
            self.tier_name.as_deref().unwrap_or(&public.name),
            self.max_slots.unwrap_or(public.max_slots),
            self.max_context.unwrap_or(public.max_context),
            profiles,
            self.max_mirrors.unwrap_or(public.max_mirrors),
        )
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.unwrap_or(1000)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms.unwrap_or(100))
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "Tier node service: enforces per-node quotas behind a WebSocket", version)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[arg(env = "TIER_NODE_ID", help = "Node identifier, e.g. PUBLIC-001.")]
    pub node_id: Option<String>,

    #[arg(long, env = "TIER_HOST", help = "Address to listen on.")]
    pub host: Option<String>,

    #[arg(long, env = "TIER_PORT", help = "Port to listen on. Derived from the node id when unset.")]
    pub port: Option<u16>,

    #[arg(long, env = "TIER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "TIER_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "TIER_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[command(flatten)]
    #[serde(flatten)]
    pub tier: TierSettings,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "Tier control plane: registers nodes and broadcasts commands to them", version)]
#[serde(rename_all = "camelCase")]
pub struct ControlConfig {
    #[arg(long, env = "TIER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "TIER_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "TIER_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "TIER_NODES", value_delimiter = ',', help = "Comma-separated in-process node ids to register.")]
    pub nodes: Option<Vec<String>>,

    #[arg(long = "remote", env = "TIER_REMOTES", value_delimiter = ',', help = "Remote node as ID=ws://host:port/ws. Repeatable.")]
    pub remotes: Option<Vec<String>>,

    #[arg(long, env = "TIER_REGISTRY_CAPACITY", help = "Maximum number of registered nodes.")]
    pub registry_capacity: Option<usize>,

    #[arg(long, env = "TIER_AUDIT_CAPACITY", help = "Audit entries kept in memory.")]
    pub audit_capacity: Option<usize>,

    #[command(flatten)]
    #[serde(flatten)]
    pub tier: TierSettings,
}

/// A configuration assembled from defaults, an optional JSON file and the command line.
pub trait Layered: DeserializeOwned + Sized {
    /// File consulted when no `--config-path` is given.
    const DEFAULT_FILE: &'static str;

    fn defaults() -> Self;

    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Self) -> Self;

    fn config_path(&self) -> Option<&Path>;
}

impl Layered for NodeConfig {
    const DEFAULT_FILE: &'static str = "tier_node.conf";

    fn defaults() -> Self {
        NodeConfig {
            host: Some("127.0.0.1".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            tier: TierSettings::defaults(),
            ..Default::default()
        }
    }

    fn merge(self, other: NodeConfig) -> NodeConfig {
        NodeConfig {
            node_id: other.node_id.or(self.node_id),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tier: self.tier.merge(other.tier),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

impl Layered for ControlConfig {
    const DEFAULT_FILE: &'static str = "tier_control.conf";

    fn defaults() -> Self {
        ControlConfig {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            nodes: Some(vec!["PUBLIC-001".into(), "PUBLIC-002".into(), "PUBLIC-003".into()]),
            registry_capacity: Some(lib_admission::registry::DEFAULT_REGISTRY_CAPACITY),
            audit_capacity: Some(lib_admission::audit::DEFAULT_AUDIT_CAPACITY),
            tier: TierSettings::defaults(),
            ..Default::default()
        }
    }

    fn merge(self, other: ControlConfig) -> ControlConfig {
        ControlConfig {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            nodes: other.nodes.or(self.nodes),
            remotes: other.remotes.or(self.remotes),
            registry_capacity: other.registry_capacity.or(self.registry_capacity),
            audit_capacity: other.audit_capacity.or(self.audit_capacity),
            tier: self.tier.merge(other.tier),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// # Load Configuration
///
/// 1. Start from built-in defaults.
/// 2. Merge the JSON config file, if one exists. An explicit `--config-path`
///    must exist and parse; the default file is optional.
/// 3. Merge the parsed command line (which already includes env variables).
pub fn load_layered<C: Layered>(cli: C) -> Result<C> {
    let mut current = C::defaults();

    let (path, explicit) = match cli.config_path() {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(C::DEFAULT_FILE), false),
    };

    if path.exists() {
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config: C =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        current = current.merge(file_config);
    } else if explicit {
        bail!("Config file not found: {}", path.display());
    } else {
        tracing::debug!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
    }

    Ok(current.merge(cli))
}

/// Node ids must carry their tier as a prefix, e.g. `PUBLIC-001` on tier `PUBLIC`.
pub fn validate_node_id(node_id: &str, tier_name: &str) -> Result<()> {
    let prefix = format!("{}-", tier_name.to_uppercase());
    if !node_id.starts_with(&prefix) || node_id.len() == prefix.len() {
        bail!("{} node IDs must start with '{}'", tier_name, prefix);
    }
    Ok(())
}

/// Deterministic port for a node id inside `NODE_PORT_BASE..NODE_PORT_BASE + NODE_PORT_SPAN`.
/// Distinct ids can collide; pass `--port` to pick one explicitly.
pub fn derive_port(node_id: &str) -> u16 {
    let digest = Sha256::digest(node_id.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]);
    NODE_PORT_BASE + n % NODE_PORT_SPAN
}

/// Splits `ID=URL` into its parts.
pub fn parse_remote(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
            Ok((id.trim().to_string(), url.trim().to_string()))
        }
        _ => bail!("Invalid remote node '{}', expected ID=ws://host:port/ws", entry),
    }
}

/// Parses an `ID=URL` remote entry and checks the id against the tier prefix.
pub fn parse_remote_node(entry: &str, tier_name: &str) -> Result<(String, String)> {
    let (node_id, url) = parse_remote(entry)?;
    validate_node_id(&node_id, tier_name)?;
    Ok((node_id, url))
}
