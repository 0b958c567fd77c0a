//!
//! message.rs
//! Wire messages for the collage 2PC protocol.
//!
extern crate serde;
extern crate serde_json;

use std::sync::atomic::{AtomicU32, Ordering};

use self::serde_json::Value;

use crate::error::ProtocolError;

/// generator for unique envelope ids, used only for audit-log ordering
static COUNTER: AtomicU32 = AtomicU32::new(1);

///
/// WireMessage
/// The five mandatory protocol tags from spec section 6. Encoding is opaque
/// to the protocol; we use serde so any transport can (de)serialize it.
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub enum WireMessage {
    /// Coordinator -> participant: propose a commit, carrying the composite
    /// image and the filenames requested from that specific participant.
    Prepare {
        txn_id: String,
        image_bytes: Vec<u8>,
        filenames: Vec<String>,
    },
    /// Participant -> coordinator: this participant's vote for txn_id.
    Vote { txn_id: String, vote: bool },
    /// Coordinator -> participant: commit txn_id.
    Commit { txn_id: String },
    /// Coordinator -> participant: abort txn_id.
    Abort { txn_id: String },
    /// Participant -> coordinator: acknowledge the decision for txn_id.
    Ack { txn_id: String },
}

impl WireMessage {
    pub fn txn_id(&self) -> &str {
        match self {
            WireMessage::Prepare { txn_id, .. } => txn_id,
            WireMessage::Vote { txn_id, .. } => txn_id,
            WireMessage::Commit { txn_id } => txn_id,
            WireMessage::Abort { txn_id } => txn_id,
            WireMessage::Ack { txn_id } => txn_id,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            WireMessage::Prepare { .. } => "PREPARE",
            WireMessage::Vote { .. } => "VOTE",
            WireMessage::Commit { .. } => "COMMIT",
            WireMessage::Abort { .. } => "ABORT",
            WireMessage::Ack { .. } => "ACK",
        }
    }
}

///
/// Envelope
/// What actually travels on the transport: a WireMessage plus the address it
/// came from (filled in by the transport on delivery, not by the sender).
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct Envelope {
    pub from: String,
    pub message: WireMessage,
}

impl Envelope {
    ///
    /// decode()
    /// The single decode step at the receive boundary (design note in
    /// section 9): a transport hands this a raw line and gets back either a
    /// typed envelope or a ProtocolError, never a panic on malformed input.
    ///
    pub fn decode(line: &str) -> Result<Envelope, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

///
/// AuditRecord
/// One line of the human-readable audit trail described in SPEC_FULL.md
/// section 4.3. Not used for recovery -- only for post-run inspection by
/// checker.rs.
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct AuditRecord {
    pub uid: u32,
    pub role: String,
    pub txid: String,
    pub event: String,
}

impl AuditRecord {
    pub fn generate(role: String, txid: String, event: String) -> AuditRecord {
        AuditRecord {
            uid: COUNTER.fetch_add(1, Ordering::SeqCst),
            role,
            txid,
            event,
        }
    }

    pub fn from_line(line: &str) -> Option<AuditRecord> {
        let data: Value = serde_json::from_str(line).ok()?;
        serde_json::from_value(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope {
            from: "A".to_string(),
            message: WireMessage::Vote {
                txn_id: "txn-1".to_string(),
                vote: true,
            },
        };
        let line = serde_json::to_string(&envelope).unwrap();
        let decoded = Envelope::decode(&line).unwrap();
        assert_eq!(decoded.from, "A");
        assert_eq!(decoded.message.txn_id(), "txn-1");
        assert_eq!(decoded.message.tag(), "VOTE");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Envelope::decode("not json at all").is_err());
    }

    #[test]
    fn audit_record_round_trips_through_a_line() {
        let rec = AuditRecord::generate("coordinator".to_string(), "txn-7".to_string(), "COMMITTED".to_string());
        let line = serde_json::to_string(&rec).unwrap();
        let decoded = AuditRecord::from_line(&line).unwrap();
        assert_eq!(decoded.uid, rec.uid);
        assert_eq!(decoded.txid, "txn-7");
        assert_eq!(decoded.event, "COMMITTED");
    }

    #[test]
    fn message_tags_match_their_variant() {
        assert_eq!(
            WireMessage::Prepare {
                txn_id: "t".to_string(),
                image_bytes: vec![],
                filenames: vec![],
            }
            .tag(),
            "PREPARE"
        );
        assert_eq!(WireMessage::Commit { txn_id: "t".to_string() }.tag(), "COMMIT");
        assert_eq!(WireMessage::Abort { txn_id: "t".to_string() }.tag(), "ABORT");
        assert_eq!(WireMessage::Ack { txn_id: "t".to_string() }.tag(), "ACK");
    }
}
