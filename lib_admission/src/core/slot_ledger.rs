//! # Slot Ledger
//!
//! Per-node accounting of admitted work. The ledger counts the slots currently in
//! use and the mirror actions currently running, and it is the only place those
//! counters change.
//!
//! ## Core Functionality:
//!
//! - **Atomic Admission**: `try_admit` evaluates the [`QuotaPolicy`] and bumps the
//!   counters while holding the ledger's lock. There is no window between "check
//!   headroom" and "increment" in which a concurrent request could slip through,
//!   so outstanding reservations never exceed the tier's `max_slots`.
//!
//! - **Scoped Release**: every successful reservation returns a [`SlotToken`].
//!   Dropping the token gives the slot (and the mirror, if it held one) back. This
//!   covers success, error, panic and cancellation of the future that owns it.
//!
//! - **Mirror Accounting**: a mirror admission also takes a mirror, and its token
//!   returns it. Mirrors are therefore a concurrency limit like slots; back-to-back
//!   mirrors on an idle node are all admitted.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::core::quota_policy::{QuotaPolicy, Rejection};
use crate::core::tier::{Command, TierConfig};

/// Point-in-time view of a ledger's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    /// Slots held by admitted, unfinished work.
    pub active_slots: u32,
    /// Mirror actions admitted and unfinished.
    pub mirror_count: u32,
}

/// # Slot Ledger
///
/// Mutable counters for a single node. Limits are copied from the tier at
/// construction so that plain slot reservations are bounded too.
#[derive(Debug)]
pub struct SlotLedger {
    max_slots: u32,
    max_mirrors: u32,
    counts: Mutex<LedgerSnapshot>,
}

impl SlotLedger {
    /// Creates an empty ledger with the given limits.
    pub fn new(max_slots: u32, max_mirrors: u32) -> Self {
        Self {
            max_slots,
            max_mirrors,
            counts: Mutex::new(LedgerSnapshot::default()),
        }
    }

    /// Creates an empty ledger sized for `tier`.
    pub fn for_tier(tier: &TierConfig) -> Self {
        Self::new(tier.max_slots, tier.max_mirrors)
    }

    // The counters are consistent at every unlock, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, LedgerSnapshot> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Try Admit
    ///
    /// Runs the policy against the current counters and, on success, takes a slot
    /// (plus a mirror for mirror actions) in the same critical section.
    pub fn try_admit(&self, policy: &QuotaPolicy, tier: &TierConfig, command: &Command) -> Result<SlotToken<'_>, Rejection> {
        let mut counts = self.lock();
        policy.check(tier, &counts, command)?;

        // The tier and the ledger limits agree when the ledger was built with
        // `for_tier`; the ledger's own limit still caps the count otherwise.
        if counts.active_slots >= self.max_slots {
            return Err(Rejection::SlotsExhausted {
                active: counts.active_slots,
                max: self.max_slots,
            });
        }
        let mirror = command.is_mirror();
        if mirror && counts.mirror_count >= self.max_mirrors {
            return Err(Rejection::MirrorsExhausted {
                active: counts.mirror_count,
                max: self.max_mirrors,
            });
        }

        counts.active_slots += 1;
        if mirror {
            counts.mirror_count += 1;
        }
        Ok(SlotToken { ledger: self, mirror })
    }

    /// Takes a single slot if one is free. No profile or mirror rules apply.
    pub fn try_reserve(&self) -> Option<SlotToken<'_>> {
        let mut counts = self.lock();
        if counts.active_slots >= self.max_slots {
            return None;
        }
        counts.active_slots += 1;
        Some(SlotToken { ledger: self, mirror: false })
    }

    /// Gives a reservation back. Equivalent to dropping the token.
    pub fn release(&self, token: SlotToken<'_>) {
        debug_assert!(std::ptr::eq(token.ledger, self), "token released on a foreign ledger");
        drop(token);
    }

    fn give_back(&self, mirror: bool) {
        let mut counts = self.lock();
        counts.active_slots = counts.active_slots.saturating_sub(1);
        if mirror {
            counts.mirror_count = counts.mirror_count.saturating_sub(1);
        }
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> LedgerSnapshot {
        *self.lock()
    }

    /// Slots held right now.
    pub fn active_slots(&self) -> u32 {
        self.lock().active_slots
    }

    /// Mirrors held right now.
    pub fn mirror_count(&self) -> u32 {
        self.lock().mirror_count
    }

    /// The slot limit.
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// The mirror limit.
    pub fn max_mirrors(&self) -> u32 {
        self.max_mirrors
    }

    /// `true` while at least one slot is free. Advisory only: the answer may be
    /// stale by the time the caller acts on it.
    pub fn has_headroom(&self) -> bool {
        self.active_slots() < self.max_slots
    }
}

/// # Slot Token
///
/// Proof of one reservation. The slot is returned exactly once, when the token
/// is dropped or handed to [`SlotLedger::release`].
#[must_use = "dropping the token releases the slot immediately"]
#[derive(Debug)]
pub struct SlotToken<'a> {
    ledger: &'a SlotLedger,
    mirror: bool,
}

impl SlotToken<'_> {
    /// `true` if this reservation also holds a mirror.
    pub fn holds_mirror(&self) -> bool {
        self.mirror
    }
}

impl Drop for SlotToken<'_> {
    fn drop(&mut self) {
        self.ledger.give_back(self.mirror);
    }
}
