//!
//! participant.rs
//! The participant side of the collage 2PC protocol: on PREPARE, validate
//! requested sources, lock them, prompt the local user, and vote; on
//! COMMIT, delete the locked sources; on ABORT, release locks. All of it
//! guarded by a single coarse lock (section 5: participant traffic for one
//! node is not highly concurrent, so a fine-grained scheme buys nothing).
//!
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::durable_log::DurableLog;
use crate::imagestore::ImageStore;
use crate::message::{Envelope, WireMessage};
use crate::oplog::OpLog;
use crate::oracle::UserOracle;
use crate::participant_state::ParticipantSnapshot;
use crate::transport::Transport;

pub struct Participant {
    id: String,
    log: DurableLog<ParticipantSnapshot>,
    audit: Mutex<OpLog>,
    state: Mutex<ParticipantSnapshot>,
    transport: Arc<dyn Transport>,
    images: ImageStore,
    oracle: Arc<dyn UserOracle>,
    coordinator_addr: String,
    running: Arc<AtomicBool>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl Participant {
    pub fn new(
        id: String,
        log_path: &str,
        audit_path: &str,
        image_root: &str,
        transport: Arc<dyn Transport>,
        oracle: Arc<dyn UserOracle>,
        coordinator_addr: String,
        running: Arc<AtomicBool>,
    ) -> Participant {
        let log = DurableLog::new(log_path);
        let snapshot = log.load();
        Participant {
            id,
            log,
            audit: Mutex::new(OpLog::from_file(audit_path)),
            state: Mutex::new(snapshot),
            transport,
            images: ImageStore::new(image_root),
            oracle,
            coordinator_addr,
            running,
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        }
    }

    fn flush(&self, state: &ParticipantSnapshot) {
        if let Err(e) = self.log.write(state) {
            error!("{}: failed to flush durable log: {}", self.id, e);
        }
    }

    fn audit(&self, txn_id: &str, event: &str) {
        self.audit.lock().unwrap().append(&self.id, txn_id, event);
    }

    fn send_to_coordinator(&self, message: WireMessage) {
        let envelope = Envelope {
            from: self.id.clone(),
            message,
        };
        if let Err(e) = self.transport.send(&self.coordinator_addr, envelope) {
            warn!("{}: send to coordinator failed: {}", self.id, e);
        }
    }

    fn vote(&self, txn_id: &str, vote: bool) {
        self.send_to_coordinator(WireMessage::Vote {
            txn_id: txn_id.to_string(),
            vote,
        });
    }

    ///
    /// handle_prepare()
    /// section 4.2: missing or cross-locked files vote NO without prompting
    /// the user; a file locked by this same txn_id (a re-delivered PREPARE)
    /// is idempotent and revotes YES without re-prompting. The blocking
    /// oracle call happens with the lock released (section 5 suspension
    /// point), so a slow user on one transaction never blocks the decision
    /// sweep for other transactions.
    ///
    fn handle_prepare(&self, txn_id: &str, image_bytes: &[u8], filenames: &[String]) {
        {
            let state = self.state.lock().unwrap();
            if state.has_active(txn_id) {
                trace!("{}: idempotent re-PREPARE for txn {}", self.id, txn_id);
                self.vote(txn_id, true);
                return;
            }
            for f in filenames {
                if !self.images.exists(f) {
                    info!("{}: voting NO for txn {}: missing source {}", self.id, txn_id, f);
                    self.vote(txn_id, false);
                    return;
                }
                if state.locked_by_other(f, txn_id) {
                    info!(
                        "{}: voting NO for txn {}: {} is locked by another transaction",
                        self.id, txn_id, f
                    );
                    self.vote(txn_id, false);
                    return;
                }
            }
        }

        let approved = self.oracle.ask(image_bytes, filenames);
        if !approved {
            info!("{}: user rejected txn {}", self.id, txn_id);
            let mut state = self.state.lock().unwrap();
            if state.release(txn_id) {
                self.flush(&state);
            }
            self.vote(txn_id, false);
            return;
        }

        let mut state = self.state.lock().unwrap();
        // Re-validate after the blocking call: another transaction may have
        // taken one of these files while we were waiting on the user.
        for f in filenames {
            if state.locked_by_other(f, txn_id) {
                info!(
                    "{}: voting NO for txn {}: {} was locked while awaiting approval",
                    self.id, txn_id, f
                );
                if state.release(txn_id) {
                    self.flush(&state);
                }
                self.vote(txn_id, false);
                return;
            }
        }

        state.lock_for(txn_id, filenames);
        self.flush(&state);
        drop(state);
        self.audit(txn_id, "VOTE_COMMIT");
        info!("{}: voting YES for txn {}", self.id, txn_id);
        self.vote(txn_id, true);
    }

    ///
    /// handle_commit()
    /// section 4.2: an unknown txn_id means the commit was already applied
    /// (or never promised locally); ACK and return, preserving at-most-once
    /// effect under retries.
    ///
    fn handle_commit(&self, txn_id: &str) {
        let filenames = {
            let state = self.state.lock().unwrap();
            state.filenames_for(txn_id)
        };
        let filenames = match filenames {
            Some(f) => f,
            None => {
                trace!("{}: COMMIT for already-applied/unknown txn {}, re-ACKing", self.id, txn_id);
                self.send_to_coordinator(WireMessage::Ack {
                    txn_id: txn_id.to_string(),
                });
                return;
            }
        };

        for f in &filenames {
            if let Err(e) = self.images.delete(f) {
                error!("{}: failed to delete source {} for txn {}: {}", self.id, f, txn_id, e);
            }
        }

        let mut state = self.state.lock().unwrap();
        state.release(txn_id);
        self.flush(&state);
        drop(state);
        self.audit(txn_id, "COMMIT");
        self.committed.fetch_add(1, Ordering::SeqCst);
        info!("{}: applied COMMIT for txn {}", self.id, txn_id);
        self.send_to_coordinator(WireMessage::Ack {
            txn_id: txn_id.to_string(),
        });
    }

    ///
    /// handle_abort()
    /// Idempotent: an ABORT for an unknown transaction is acknowledged
    /// without state change.
    ///
    fn handle_abort(&self, txn_id: &str) {
        let mut state = self.state.lock().unwrap();
        let changed = state.release(txn_id);
        if changed {
            self.flush(&state);
            drop(state);
            self.audit(txn_id, "ABORT");
            self.aborted.fetch_add(1, Ordering::SeqCst);
            info!("{}: applied ABORT for txn {}", self.id, txn_id);
        }
        self.send_to_coordinator(WireMessage::Ack {
            txn_id: txn_id.to_string(),
        });
    }

    ///
    /// no_lock_leakage()
    /// True if this participant holds no lock for txn_id -- expected to
    /// hold once txn_id has reached a terminal state (section 8).
    ///
    pub fn no_lock_leakage(&self, txn_id: &str) -> bool {
        self.state.lock().unwrap().no_lock_references(txn_id)
    }

    pub fn report_status(&self) {
        println!(
            "{}:\tC:{}\tA:{}",
            self.id,
            self.committed.load(Ordering::SeqCst),
            self.aborted.load(Ordering::SeqCst)
        );
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope.message {
            WireMessage::Prepare {
                txn_id,
                image_bytes,
                filenames,
            } => self.handle_prepare(&txn_id, &image_bytes, &filenames),
            WireMessage::Commit { txn_id } => self.handle_commit(&txn_id),
            WireMessage::Abort { txn_id } => self.handle_abort(&txn_id),
            other => {
                warn!(
                    "{}: unexpected message tag {} from {}",
                    self.id,
                    other.tag(),
                    envelope.from
                );
            }
        }
    }

    pub fn run(self: Arc<Self>, msg_rx: Receiver<Envelope>) {
        while self.running.load(Ordering::SeqCst) {
            match msg_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(envelope) => self.dispatch(envelope),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.report_status();
    }
}
