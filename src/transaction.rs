//!
//! transaction.rs
//! The coordinator's transaction record and its state machine, per
//! SPEC_FULL.md section 3.
//!
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

///
/// TxnState
/// INIT -> PREPARING -> {COMMITTING | ABORTING} -> {COMMITTED | ABORTED}.
/// One-way; no cycles, no regress (invariant 2).
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Init,
    Preparing,
    Committing,
    Aborting,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

///
/// TransactionRecord
/// One per active or completed commit, kept indefinitely (absent explicit
/// compaction -- see SPEC_FULL.md section 9).
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct TransactionRecord {
    pub id: String,
    pub filename: String,
    pub image_bytes: Vec<u8>,
    /// participant address -> ordered filenames requested from it.
    pub participant_images: BTreeMap<String, Vec<String>>,
    pub state: TxnState,
    pub votes_received: BTreeSet<String>,
    pub ack_pending: BTreeSet<String>,
    /// Wall-clock deadline for the PREPARING phase. Not serialized: it is
    /// re-armed on load by the recovery routine (a stale deadline after a
    /// restart is meaningless).
    #[serde(skip, default = "default_deadline")]
    pub prepare_deadline: Instant,
    /// When this record reached a terminal state, for the optional
    /// compaction sweep (section 9). Not serialized for the same reason as
    /// `prepare_deadline`; a restarted process simply never compacts
    /// records it didn't itself see terminate, which is harmless since
    /// compaction is explicit and operator-invoked, not automatic.
    #[serde(skip)]
    pub completed_at: Option<Instant>,
}

fn default_deadline() -> Instant {
    Instant::now()
}

impl TransactionRecord {
    pub fn new(
        id: String,
        filename: String,
        image_bytes: Vec<u8>,
        participant_images: BTreeMap<String, Vec<String>>,
        prepare_deadline: Instant,
    ) -> TransactionRecord {
        let ack_pending = participant_images.keys().cloned().collect();
        TransactionRecord {
            id,
            filename,
            image_bytes,
            participant_images,
            state: TxnState::Preparing,
            votes_received: BTreeSet::new(),
            ack_pending,
            prepare_deadline,
            completed_at: None,
        }
    }

    pub fn participants(&self) -> BTreeSet<String> {
        self.participant_images.keys().cloned().collect()
    }

    pub fn is_unanimous(&self) -> bool {
        self.votes_received.len() == self.participant_images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TransactionRecord {
        let mut participant_images = BTreeMap::new();
        participant_images.insert("A".to_string(), vec!["a1.jpg".to_string()]);
        participant_images.insert("B".to_string(), vec!["b1.jpg".to_string()]);
        TransactionRecord::new(
            "txn-1".to_string(),
            "out.jpg".to_string(),
            vec![1, 2, 3],
            participant_images,
            Instant::now(),
        )
    }

    #[test]
    fn new_record_starts_preparing_with_full_ack_pending() {
        let record = record();
        assert_eq!(record.state, TxnState::Preparing);
        assert_eq!(record.ack_pending, record.participants());
        assert!(record.votes_received.is_empty());
    }

    #[test]
    fn unanimous_only_once_every_participant_voted() {
        let mut record = record();
        assert!(!record.is_unanimous());
        record.votes_received.insert("A".to_string());
        assert!(!record.is_unanimous());
        record.votes_received.insert("B".to_string());
        assert!(record.is_unanimous());
    }

    #[test]
    fn terminal_states_are_committed_and_aborted_only() {
        assert!(!TxnState::Init.is_terminal());
        assert!(!TxnState::Preparing.is_terminal());
        assert!(!TxnState::Committing.is_terminal());
        assert!(!TxnState::Aborting.is_terminal());
        assert!(TxnState::Committed.is_terminal());
        assert!(TxnState::Aborted.is_terminal());
    }
}
