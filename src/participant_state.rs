//!
//! participant_state.rs
//! The participant's two persisted maps and the lock-manager operations
//! over them, per SPEC_FULL.md section 3 invariants 6-8. Guarded by a
//! single coarse lock in participant.rs (section 5: participant traffic for
//! one node is not highly concurrent).
//!
use std::collections::BTreeMap;

///
/// ParticipantSnapshot
/// Exactly what gets durably logged for a participant.
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default)]
pub struct ParticipantSnapshot {
    /// txn id -> filenames this participant promised for it.
    pub active_transactions: BTreeMap<String, Vec<String>>,
    /// filename -> txn id currently holding the lock.
    pub locked_images: BTreeMap<String, String>,
}

impl ParticipantSnapshot {
    ///
    /// lock_for()
    /// Records a promise for txn_id over the given filenames and locks each
    /// one. Caller must have already checked that none of the filenames are
    /// locked by a different transaction (invariant 7).
    ///
    pub fn lock_for(&mut self, txn_id: &str, filenames: &[String]) {
        self.active_transactions
            .insert(txn_id.to_string(), filenames.to_vec());
        for f in filenames {
            self.locked_images.insert(f.clone(), txn_id.to_string());
        }
    }

    ///
    /// locked_by_other()
    /// True if `filename` is currently locked by a transaction other than
    /// txn_id.
    ///
    pub fn locked_by_other(&self, filename: &str, txn_id: &str) -> bool {
        match self.locked_images.get(filename) {
            Some(holder) => holder != txn_id,
            None => false,
        }
    }

    ///
    /// release()
    /// Drops the active_transactions entry for txn_id and releases any
    /// filename lock that still maps to it (invariant 6: a lock and its
    /// active_transactions entry are released together, matching txn_id).
    /// Safe to call for an unknown txn_id (no-op, returns false), which is
    /// what makes ABORT and re-delivered COMMIT idempotent. Returns true if
    /// state actually changed, so callers can skip an unnecessary flush.
    ///
    pub fn release(&mut self, txn_id: &str) -> bool {
        match self.active_transactions.remove(txn_id) {
            Some(filenames) => {
                for f in filenames {
                    if self.locked_images.get(&f).map(String::as_str) == Some(txn_id) {
                        self.locked_images.remove(&f);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn has_active(&self, txn_id: &str) -> bool {
        self.active_transactions.contains_key(txn_id)
    }

    pub fn filenames_for(&self, txn_id: &str) -> Option<Vec<String>> {
        self.active_transactions.get(txn_id).cloned()
    }

    ///
    /// no_lock_references()
    /// True if no entry in locked_images still names txn_id. Used by tests
    /// and checker.rs to verify the no-lock-leakage property (section 8).
    ///
    pub fn no_lock_references(&self, txn_id: &str) -> bool {
        !self.locked_images.values().any(|v| v == txn_id)
    }
}
