//! # Tier Configuration and Commands
//!
//! A tier is the named bundle of quota values applied uniformly to a deployment
//! class of nodes. A `TierConfig` is fixed when a node is built and never mutated
//! afterwards; every node holds its own copy.
//!
//! A `Command` is the unit of work a caller asks a node to admit. The core never
//! mutates it, it only reads `action` and `profile` to make admission decisions
//! and passes the rest through to the work operation and the audit log untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The action name that is subject to the mirror quota in addition to slots.
pub const MIRROR_ACTION: &str = "mirror";

/// The action name a node answers with its own status instead of admitting work.
pub const STATUS_ACTION: &str = "status";

/// # Tier Configuration
///
/// Immutable per-node quota values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    /// Tier label carried on every reply (e.g. `PUBLIC`).
    pub name: String,
    /// Maximum number of concurrently admitted units of work.
    pub max_slots: u32,
    /// Largest context window a profile may use on this tier. Reported, not enforced.
    pub max_context: u32,
    /// Processing profiles a command may request.
    pub allowed_profiles: BTreeSet<String>,
    /// Maximum number of concurrently running mirror actions.
    pub max_mirrors: u32,
}

impl TierConfig {
    /// Builds a tier from its quota values.
    pub fn new<I, S>(name: &str, max_slots: u32, max_context: u32, allowed_profiles: I, max_mirrors: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            max_slots,
            max_context,
            allowed_profiles: allowed_profiles.into_iter().map(Into::into).collect(),
            max_mirrors,
        }
    }

    /// The public tier the control plane ships with.
    pub fn public() -> Self {
        Self::new("PUBLIC", 400, 8192, ["logos9.5"], 3)
    }

    /// Returns `true` when `profile` is on this tier's allow-list.
    pub fn allows_profile(&self, profile: &str) -> bool {
        self.allowed_profiles.contains(profile)
    }

    /// Title-cased tier label, used in human-facing messages (`PUBLIC` -> `Public`).
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    }

    /// The message carried by a policy rejection on this tier.
    pub fn limit_exceeded_message(&self) -> String {
        format!("{} tier limit exceeded", self.display_name())
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::public()
    }
}

/// # Command
///
/// One logical request. `profile` also accepts the `model` key and `payload`
/// also accepts `prompt`; when both keys of a pair are sent, `profile` and
/// `payload` win. Every other field is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireCommand")]
pub struct Command {
    /// What the caller wants done (`process`, `mirror`, `status`, ...).
    pub action: String,
    /// The processing profile requested, e.g. a model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Opaque content for the work operation.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload: String,
    /// Any other fields the caller sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound shape of a `Command`, with both spellings of the aliased keys.
#[derive(Deserialize)]
struct WireCommand {
    action: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<WireCommand> for Command {
    fn from(wire: WireCommand) -> Self {
        Self {
            action: wire.action,
            profile: wire.profile.or(wire.model),
            payload: wire.payload.or(wire.prompt).unwrap_or_default(),
            extra: wire.extra,
        }
    }
}

impl Command {
    /// Creates a command with an action and a profile and no payload.
    pub fn new(action: &str, profile: &str) -> Self {
        Self {
            action: action.to_string(),
            profile: Some(profile.to_string()),
            payload: String::new(),
            extra: Map::new(),
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Adds an opaque extra field.
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Returns `true` for the mirror action.
    pub fn is_mirror(&self) -> bool {
        self.action == MIRROR_ACTION
    }

    /// Returns `true` for the status query.
    pub fn is_status_query(&self) -> bool {
        self.action == STATUS_ACTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_tier_defaults() {
        let tier = TierConfig::public();
        assert_eq!(tier.max_slots, 400);
        assert_eq!(tier.max_context, 8192);
        assert_eq!(tier.max_mirrors, 3);
        assert!(tier.allows_profile("logos9.5"));
        assert!(!tier.allows_profile("logos10"));
    }

    #[test]
    fn test_limit_message_uses_title_case() {
        assert_eq!(TierConfig::public().limit_exceeded_message(), "Public tier limit exceeded");
        let tier = TierConfig::new("enterprise", 1, 1, ["p1"], 0);
        assert_eq!(tier.display_name(), "Enterprise");
    }

    #[test]
    fn test_command_accepts_model_and_prompt_aliases() {
        let cmd: Command = serde_json::from_value(json!({
            "action": "process",
            "model": "logos9.5",
            "prompt": "hello",
            "tier": "PUBLIC"
        }))
        .unwrap();

        assert_eq!(cmd.action, "process");
        assert_eq!(cmd.profile.as_deref(), Some("logos9.5"));
        assert_eq!(cmd.payload, "hello");
        assert_eq!(cmd.extra.get("tier"), Some(&json!("PUBLIC")));
    }

    #[test]
    fn test_profile_wins_over_model_when_both_are_sent() {
        let cmd: Command = serde_json::from_value(json!({
            "action": "process",
            "profile": "p1",
            "model": "logos9.5",
            "payload": "a",
            "prompt": "b"
        }))
        .unwrap();

        assert_eq!(cmd.profile.as_deref(), Some("p1"));
        assert_eq!(cmd.payload, "a");
        assert!(cmd.extra.is_empty());

        let round: Command = serde_json::from_str(&serde_json::to_string(&cmd).unwrap()).unwrap();
        assert_eq!(round, cmd);
    }

    #[test]
    fn test_command_without_profile() {
        let cmd: Command = serde_json::from_str(r#"{"action":"status"}"#).unwrap();
        assert!(cmd.profile.is_none());
        assert!(cmd.is_status_query());
        assert!(serde_json::from_str::<Command>(r#"{"profile":"p1"}"#).is_err());
    }
}
