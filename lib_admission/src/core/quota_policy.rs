//! # Quota Policy
//!
//! The pure admission decision. Given a node's tier, a snapshot of its ledger and a
//! proposed command, the policy decides admit or reject. Rules run in a fixed
//! order and the first failing rule is reported:
//!
//! 1. the requested profile must be on the tier's allow-list;
//! 2. the node must have a free slot;
//! 3. a mirror action additionally needs a free mirror.
//!
//! The policy holds no state and has no side effects, so the same inputs always
//! produce the same decision. Callers that act on the decision must evaluate it
//! under the ledger's lock, see [`SlotLedger::try_admit`](crate::core::slot_ledger::SlotLedger::try_admit).

use thiserror::Error;

use crate::core::slot_ledger::LedgerSnapshot;
use crate::core::tier::{Command, TierConfig};

/// Why a command was not admitted. Always the first rule that failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The requested profile is missing or not on the allow-list.
    #[error("{}", profile_message(.profile))]
    ProfileNotAllowed {
        /// The profile the command asked for, if any.
        profile: Option<String>,
    },
    /// Every slot on the node is taken.
    #[error("slots exhausted ({active}/{max})")]
    SlotsExhausted {
        /// Slots in use when the decision was made.
        active: u32,
        /// The tier's slot limit.
        max: u32,
    },
    /// Every mirror on the node is taken.
    #[error("mirroring limit reached ({active}/{max})")]
    MirrorsExhausted {
        /// Mirrors in use when the decision was made.
        active: u32,
        /// The tier's mirror limit.
        max: u32,
    },
}

fn profile_message(profile: &Option<String>) -> String {
    match profile {
        Some(p) => format!("profile {} not allowed", p),
        None => "no profile requested".to_string(),
    }
}

/// Stateless admission rules for one tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaPolicy;

impl QuotaPolicy {
    /// Evaluates the rules in order and returns the first failure.
    pub fn check(&self, config: &TierConfig, ledger: &LedgerSnapshot, command: &Command) -> Result<(), Rejection> {
        match command.profile.as_deref() {
            Some(profile) if config.allows_profile(profile) => {}
            other => {
                return Err(Rejection::ProfileNotAllowed {
                    profile: other.map(str::to_string),
                })
            }
        }

        if ledger.active_slots >= config.max_slots {
            return Err(Rejection::SlotsExhausted {
                active: ledger.active_slots,
                max: config.max_slots,
            });
        }

        if command.is_mirror() && ledger.mirror_count >= config.max_mirrors {
            return Err(Rejection::MirrorsExhausted {
                active: ledger.mirror_count,
                max: config.max_mirrors,
            });
        }

        Ok(())
    }

    /// Boolean form of [`check`](Self::check).
    pub fn admit(&self, config: &TierConfig, ledger: &LedgerSnapshot, command: &Command) -> bool {
        self.check(config, ledger, command).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> TierConfig {
        TierConfig::new("PUBLIC", 2, 8192, ["p1"], 1)
    }

    fn snapshot(active_slots: u32, mirror_count: u32) -> LedgerSnapshot {
        LedgerSnapshot {
            active_slots,
            mirror_count,
        }
    }

    #[test]
    fn test_unknown_profile_rejected_regardless_of_ledger() {
        let policy = QuotaPolicy;
        let cmd = Command::new("process", "p2");
        for (slots, mirrors) in [(0, 0), (1, 0), (2, 1), (5, 5)] {
            assert!(!policy.admit(&tier(), &snapshot(slots, mirrors), &cmd));
            assert_eq!(
                policy.check(&tier(), &snapshot(slots, mirrors), &cmd),
                Err(Rejection::ProfileNotAllowed { profile: Some("p2".into()) })
            );
        }
    }

    #[test]
    fn test_missing_profile_rejected() {
        let mut cmd = Command::new("process", "p1");
        cmd.profile = None;
        assert_eq!(
            QuotaPolicy.check(&tier(), &snapshot(0, 0), &cmd),
            Err(Rejection::ProfileNotAllowed { profile: None })
        );
    }

    #[test]
    fn test_slot_exhaustion() {
        let cmd = Command::new("process", "p1");
        assert!(QuotaPolicy.admit(&tier(), &snapshot(1, 0), &cmd));
        assert_eq!(
            QuotaPolicy.check(&tier(), &snapshot(2, 0), &cmd),
            Err(Rejection::SlotsExhausted { active: 2, max: 2 })
        );
    }

    #[test]
    fn test_mirror_rule_only_applies_to_mirror_action() {
        let mirror = Command::new("mirror", "p1");
        let process = Command::new("process", "p1");
        assert!(QuotaPolicy.admit(&tier(), &snapshot(0, 0), &mirror));
        assert_eq!(
            QuotaPolicy.check(&tier(), &snapshot(0, 1), &mirror),
            Err(Rejection::MirrorsExhausted { active: 1, max: 1 })
        );
        assert!(QuotaPolicy.admit(&tier(), &snapshot(0, 1), &process));
    }

    #[test]
    fn test_first_failing_rule_is_reported() {
        // Both the profile and slot rules fail; the profile rule runs first.
        let cmd = Command::new("mirror", "nope");
        assert!(matches!(
            QuotaPolicy.check(&tier(), &snapshot(2, 1), &cmd),
            Err(Rejection::ProfileNotAllowed { .. })
        ));
        // Slots and mirrors both exhausted; slots are reported.
        let cmd = Command::new("mirror", "p1");
        assert!(matches!(
            QuotaPolicy.check(&tier(), &snapshot(2, 1), &cmd),
            Err(Rejection::SlotsExhausted { .. })
        ));
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            Rejection::ProfileNotAllowed { profile: Some("p2".into()) }.to_string(),
            "profile p2 not allowed"
        );
        assert_eq!(Rejection::ProfileNotAllowed { profile: None }.to_string(), "no profile requested");
        assert_eq!(Rejection::SlotsExhausted { active: 2, max: 2 }.to_string(), "slots exhausted (2/2)");
        assert_eq!(
            Rejection::MirrorsExhausted { active: 1, max: 1 }.to_string(),
            "mirroring limit reached (1/1)"
        );
        let err: &dyn std::error::Error = &Rejection::SlotsExhausted { active: 0, max: 0 };
        assert!(err.source().is_none());
    }

    #[test]
    fn test_zero_slot_tier_never_admits() {
        let tier = TierConfig::new("PUBLIC", 0, 8192, ["p1"], 3);
        assert!(!QuotaPolicy.admit(&tier, &snapshot(0, 0), &Command::new("process", "p1")));
    }
}
