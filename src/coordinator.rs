//!
//! coordinator.rs
//! The coordinator side of the collage 2PC protocol: drives each commit
//! through PREPARING -> COMMITTING/ABORTING -> COMMITTED/ABORTED, writes the
//! composite image on unanimous YES, persists its transaction table, and
//! retries decisions until every participant has acknowledged.
//!
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use atomic_counter::{AtomicCounter, ConsistentCounter};
use dashmap::DashMap;

use crate::durable_log::DurableLog;
use crate::imagestore::ImageStore;
use crate::message::{Envelope, WireMessage};
use crate::oplog::OpLog;
use crate::retry::{TimerEvent, TimerWheel, DECISION_HEARTBEAT, PREPARE_DEADLINE};
use crate::transaction::{TransactionRecord, TxnState};
use crate::transport::Transport;

///
/// CoordinatorSnapshot
/// Exactly what gets durably logged: the id counter and the full
/// transaction table (section 3: "kept indefinitely in-memory and on log").
///
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default)]
pub struct CoordinatorSnapshot {
    pub counter: u64,
    pub transactions: BTreeMap<String, TransactionRecord>,
}

pub struct Coordinator {
    id: String,
    log: DurableLog<CoordinatorSnapshot>,
    audit: Mutex<OpLog>,
    transactions: DashMap<String, Mutex<TransactionRecord>>,
    /// Transaction-id generator. A ConsistentCounter (CAS-loop, not
    /// fetch_add) matches the teacher's atomic-counter dependency, which
    /// this spec revives for the one place the reference skeleton meant it
    /// for: minting sequential txn ids under concurrent start_commit calls.
    counter: ConsistentCounter,
    transport: Arc<dyn Transport>,
    images: ImageStore,
    timers: Arc<TimerWheel>,
    running: Arc<AtomicBool>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl Coordinator {
    ///
    /// new()
    /// Replays the durable log. Any transaction found in PREPARING is
    /// forced to ABORTING per the crash-recovery rule in section 4.1, and
    /// the corrected state is flushed immediately so a second crash before
    /// any message is sent still recovers to ABORTING.
    ///
    pub fn new(
        id: String,
        log_path: &str,
        audit_path: &str,
        image_root: &str,
        transport: Arc<dyn Transport>,
        running: Arc<AtomicBool>,
    ) -> Coordinator {
        let log = DurableLog::new(log_path);
        let snapshot = log.load();
        let transactions = DashMap::new();
        let mut forced_abort = false;
        for (txn_id, mut record) in snapshot.transactions {
            if record.state == TxnState::Preparing {
                warn!(
                    "coordinator: txn {} was PREPARING at last crash, forcing ABORTING",
                    txn_id
                );
                record.state = TxnState::Aborting;
                record.prepare_deadline = Instant::now();
                forced_abort = true;
            }
            transactions.insert(txn_id, Mutex::new(record));
        }

        let coordinator = Coordinator {
            id,
            log,
            audit: Mutex::new(OpLog::from_file(audit_path)),
            transactions,
            counter: ConsistentCounter::new(snapshot.counter as usize),
            transport,
            images: ImageStore::new(image_root),
            timers: TimerWheel::new(),
            running,
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
        };

        if forced_abort {
            coordinator.flush();
        }
        coordinator
    }

    fn envelope(&self, message: WireMessage) -> Envelope {
        Envelope {
            from: self.id.clone(),
            message,
        }
    }

    fn flush(&self) {
        self.flush_with(None);
    }

    ///
    /// flush_with()
    /// Same as `flush()`, but substitutes `held` for its entry instead of
    /// re-locking it. Callers that are already holding a record's Mutex
    /// across a flush (decide_commit/decide_abort and the handlers that
    /// call them) must use this: `std::sync::Mutex` is not reentrant, and
    /// `.iter()`-and-relock over every entry would deadlock against the
    /// lock the caller is still holding.
    ///
    fn flush_with(&self, held: Option<(&str, &TransactionRecord)>) {
        let transactions = self
            .transactions
            .iter()
            .map(|e| match held {
                Some((txn_id, record)) if e.key() == txn_id => (e.key().clone(), record.clone()),
                _ => (e.key().clone(), e.value().lock().unwrap().clone()),
            })
            .collect();
        let snapshot = CoordinatorSnapshot {
            counter: self.counter.get() as u64,
            transactions,
        };
        if let Err(e) = self.log.write(&snapshot) {
            error!("coordinator: failed to flush durable log: {}", e);
        }
    }

    fn audit(&self, txn_id: &str, event: &str) {
        self.audit.lock().unwrap().append("coordinator", txn_id, event);
    }

    ///
    /// start_commit()
    /// The single entry point from the commit originator (section 4.1).
    /// `sources` is a list of "<participant>:<filename>" strings; an
    /// unparseable source is dropped with a warning, not a rejection of the
    /// whole commit.
    ///
    pub fn start_commit(&self, filename: String, image_bytes: Vec<u8>, sources: Vec<String>) -> String {
        let mut participant_images: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for source in &sources {
            match source.split_once(':') {
                Some((participant, file)) if !participant.is_empty() && !file.is_empty() => {
                    participant_images
                        .entry(participant.to_string())
                        .or_default()
                        .push(file.to_string());
                }
                _ => {
                    warn!("coordinator: malformed source reference {:?}, dropping", source);
                }
            }
        }

        self.counter.inc();
        let txn_id = format!("txn-{}", self.counter.get());
        let deadline = Instant::now() + PREPARE_DEADLINE;
        let record = TransactionRecord::new(
            txn_id.clone(),
            filename,
            image_bytes.clone(),
            participant_images.clone(),
            deadline,
        );

        self.transactions.insert(txn_id.clone(), Mutex::new(record));
        // Log before send (section 5): the snapshot must reflect PREPARING
        // before any participant can possibly observe this transaction.
        self.flush();
        self.audit(&txn_id, "PREPARING");
        info!("coordinator: txn {} entering PREPARING", txn_id);

        for (participant, filenames) in &participant_images {
            let prepare = self.envelope(WireMessage::Prepare {
                txn_id: txn_id.clone(),
                image_bytes: image_bytes.clone(),
                filenames: filenames.clone(),
            });
            if let Err(e) = self.transport.send(participant, prepare) {
                warn!("coordinator: send PREPARE to {} failed: {}", participant, e);
            }
        }

        self.timers.schedule_prepare_deadline(txn_id.clone(), deadline);
        txn_id
    }

    fn decide_commit(&self, txn_id: &str, record: &mut TransactionRecord) {
        record.state = TxnState::Committing;
        // log-then-write (section 9 resolution of the reference's ordering bug):
        // persist COMMITTING before the composite file can exist on disk.
        // `record`'s own Mutex is still held here, so flush_with() substitutes
        // it instead of relocking it.
        self.flush_with(Some((txn_id, &*record)));
        if let Err(e) = self.images.write(&record.filename, &record.image_bytes) {
            error!("coordinator: failed to write composite for txn {}: {}", txn_id, e);
        }
        self.audit(txn_id, "COMMITTING");
        info!("coordinator: txn {} entering COMMITTING", txn_id);
        self.broadcast_decision(txn_id, record, true);
    }

    fn decide_abort(&self, txn_id: &str, record: &mut TransactionRecord) {
        record.state = TxnState::Aborting;
        self.flush_with(Some((txn_id, &*record)));
        self.audit(txn_id, "ABORTING");
        info!("coordinator: txn {} entering ABORTING", txn_id);
        self.broadcast_decision(txn_id, record, false);
    }

    fn broadcast_decision(&self, txn_id: &str, record: &TransactionRecord, commit: bool) {
        for participant in &record.ack_pending {
            let msg = if commit {
                WireMessage::Commit { txn_id: txn_id.to_string() }
            } else {
                WireMessage::Abort { txn_id: txn_id.to_string() }
            };
            let envelope = self.envelope(msg);
            if let Err(e) = self.transport.send(participant, envelope) {
                warn!("coordinator: send decision to {} failed: {}", participant, e);
            }
        }
    }

    ///
    /// handle_vote()
    /// section 4.1: a NO is final and immediate; a YES is added to
    /// votes_received and triggers COMMITTING only once unanimous. Votes
    /// received outside PREPARING are ignored silently (late YES after an
    /// abort decision, or a duplicate).
    ///
    fn handle_vote(&self, from: &str, txn_id: &str, vote: bool) {
        let entry = match self.transactions.get(txn_id) {
            Some(e) => e,
            None => {
                warn!("coordinator: vote for unknown txn {}", txn_id);
                return;
            }
        };
        let mut record = entry.lock().unwrap();
        if record.state != TxnState::Preparing {
            trace!(
                "coordinator: ignoring vote from {} for txn {} in state {:?}",
                from, txn_id, record.state
            );
            return;
        }

        if !vote {
            info!("coordinator: txn {} received NO from {}", txn_id, from);
            self.decide_abort(txn_id, &mut record);
            return;
        }

        record.votes_received.insert(from.to_string());
        if record.is_unanimous() {
            self.decide_commit(txn_id, &mut record);
        } else {
            self.flush_with(Some((txn_id, &*record)));
        }
    }

    ///
    /// handle_ack()
    /// section 4.1: removes `from` from ack_pending; the transaction
    /// terminates once every participant has acknowledged the decision.
    ///
    fn handle_ack(&self, from: &str, txn_id: &str) {
        let entry = match self.transactions.get(txn_id) {
            Some(e) => e,
            None => {
                warn!("coordinator: ack for unknown txn {}", txn_id);
                return;
            }
        };
        let mut record = entry.lock().unwrap();
        record.ack_pending.remove(from);
        if record.ack_pending.is_empty() {
            match record.state {
                TxnState::Committing => {
                    record.state = TxnState::Committed;
                    record.completed_at = Some(Instant::now());
                    self.committed.fetch_add(1, Ordering::SeqCst);
                    self.audit(txn_id, "COMMITTED");
                    info!("coordinator: txn {} COMMITTED", txn_id);
                    self.flush_with(Some((txn_id, &*record)));
                }
                TxnState::Aborting => {
                    record.state = TxnState::Aborted;
                    record.completed_at = Some(Instant::now());
                    self.aborted.fetch_add(1, Ordering::SeqCst);
                    self.audit(txn_id, "ABORTED");
                    info!("coordinator: txn {} ABORTED", txn_id);
                    self.flush_with(Some((txn_id, &*record)));
                }
                _ => {}
            }
        }
    }

    fn handle_prepare_deadline(&self, txn_id: &str) {
        let entry = match self.transactions.get(txn_id) {
            Some(e) => e,
            None => return,
        };
        let mut record = entry.lock().unwrap();
        if record.state == TxnState::Preparing {
            warn!("coordinator: txn {} missed its PREPARE deadline, aborting", txn_id);
            self.decide_abort(txn_id, &mut record);
        }
    }

    fn handle_decision_sweep(&self) {
        for entry in self.transactions.iter() {
            let txn_id = entry.key().clone();
            let record = entry.value().lock().unwrap();
            match record.state {
                TxnState::Committing => self.broadcast_decision(&txn_id, &record, true),
                TxnState::Aborting => self.broadcast_decision(&txn_id, &record, false),
                _ => {}
            }
        }
    }

    ///
    /// compact()
    /// Drops transaction records in COMMITTED/ABORTED that completed more
    /// than `grace_period` ago, per the retention design note in section 9.
    /// Explicit and operator-invoked, never run automatically: the spec's
    /// Non-goals exclude automatic garbage collection of completed records.
    /// Returns how many records were dropped.
    ///
    pub fn compact(&self, grace_period: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .transactions
            .iter()
            .filter_map(|entry| {
                let record = entry.value().lock().unwrap();
                match record.completed_at {
                    Some(at) if record.state.is_terminal() && now.duration_since(at) >= grace_period => {
                        Some(entry.key().clone())
                    }
                    _ => None,
                }
            })
            .collect();

        for txn_id in &stale {
            self.transactions.remove(txn_id);
        }
        if !stale.is_empty() {
            info!("coordinator: compacted {} completed transaction(s)", stale.len());
            self.flush();
        }
        stale.len()
    }

    pub fn state_of(&self, txn_id: &str) -> Option<TxnState> {
        self.transactions.get(txn_id).map(|e| e.lock().unwrap().state)
    }

    pub fn report_status(&self) {
        println!(
            "coordinator:\tC:{}\tA:{}",
            self.committed.load(Ordering::SeqCst),
            self.aborted.load(Ordering::SeqCst)
        );
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope.message {
            WireMessage::Vote { txn_id, vote } => self.handle_vote(&envelope.from, &txn_id, vote),
            WireMessage::Ack { txn_id } => self.handle_ack(&envelope.from, &txn_id),
            other => {
                warn!(
                    "coordinator: unexpected message tag {} from {}",
                    other.tag(),
                    envelope.from
                );
            }
        }
    }

    ///
    /// run()
    /// Spawns the inbound-message dispatcher and the timer-wheel driven
    /// retry engine, and blocks until `running` is cleared. Each is its own
    /// thread; the per-transaction Mutex plus the DashMap's own internal
    /// sharding is what makes concurrent dispatch and sweeping safe
    /// (section 5).
    ///
    pub fn run(self: Arc<Self>, msg_rx: Receiver<Envelope>) {
        self.timers.schedule_sweep(Instant::now() + DECISION_HEARTBEAT);

        let (timer_tx, timer_rx) = std::sync::mpsc::channel();
        let driver_handle = self.timers.clone().spawn_driver(timer_tx);

        let timer_self = self.clone();
        let timer_thread = thread::spawn(move || {
            while timer_self.running.load(Ordering::SeqCst) {
                match timer_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(TimerEvent::PrepareDeadline(txn_id)) => {
                        timer_self.handle_prepare_deadline(&txn_id);
                    }
                    Ok(TimerEvent::DecisionSweep) => {
                        timer_self.handle_decision_sweep();
                        timer_self
                            .timers
                            .schedule_sweep(Instant::now() + DECISION_HEARTBEAT);
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        while self.running.load(Ordering::SeqCst) {
            match msg_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(envelope) => self.dispatch(envelope),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        self.timers.stop();
        let _ = timer_thread.join();
        let _ = driver_handle.join();
        self.report_status();
    }
}
