//!
//! retry.rs
//! The coordinator-only retry/timeout engine from SPEC_FULL.md section 4.4,
//! redesigned per the section 9 design note as a single min-heap timer
//! wheel shared by all transactions instead of one thread per transaction.
//!
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

pub const PREPARE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(3);
pub const DECISION_HEARTBEAT: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Clone, Debug)]
pub enum TimerEvent {
    /// The PREPARING phase for this transaction has run out of time.
    PrepareDeadline(String),
    /// Time to resend COMMIT/ABORT to every participant still in
    /// ack_pending, across all non-terminal transactions.
    DecisionSweep,
}

struct Entry {
    at: Instant,
    seq: u64,
    event: TimerEvent,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) behaves like a min-heap on `at`.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

///
/// TimerWheel
/// A single background thread drains the earliest-deadline entry and
/// forwards it on `sink`, blocking efficiently via a condvar rather than
/// busy-polling. Scheduling is thread-safe and can be called concurrently
/// from the inbound-message handlers and the sweep itself (self re-arming).
///
pub struct TimerWheel {
    heap: Mutex<BinaryHeap<Entry>>,
    cv: Condvar,
    seq: AtomicU64,
    stopped: std::sync::atomic::AtomicBool,
}

impl TimerWheel {
    pub fn new() -> Arc<TimerWheel> {
        Arc::new(TimerWheel {
            heap: Mutex::new(BinaryHeap::new()),
            cv: Condvar::new(),
            seq: AtomicU64::new(0),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn push(&self, at: Instant, event: TimerEvent) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        let mut heap = self.heap.lock().unwrap();
        heap.push(Entry { at, seq, event });
        self.cv.notify_all();
    }

    pub fn schedule_prepare_deadline(&self, txn_id: String, at: Instant) {
        self.push(at, TimerEvent::PrepareDeadline(txn_id));
    }

    pub fn schedule_sweep(&self, at: Instant) {
        self.push(at, TimerEvent::DecisionSweep);
    }

    pub fn stop(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        self.cv.notify_all();
    }

    ///
    /// spawn_driver()
    /// Runs for the process lifetime (section 5: "the retry sweeper itself
    /// is never cancelled during normal operation"), pushing due events to
    /// `sink` for the coordinator's event loop to act on.
    ///
    pub fn spawn_driver(self: Arc<Self>, sink: Sender<TimerEvent>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            let mut heap = self.heap.lock().unwrap();
            loop {
                if self.stopped.load(AtomicOrdering::SeqCst) {
                    return;
                }
                match heap.peek() {
                    None => {
                        heap = self.cv.wait(heap).unwrap();
                    }
                    Some(entry) => {
                        let now = Instant::now();
                        if entry.at <= now {
                            let entry = heap.pop().unwrap();
                            drop(heap);
                            if sink.send(entry.event).is_err() {
                                return;
                            }
                            break;
                        } else {
                            let (h, _) = self.cv.wait_timeout(heap, entry.at - now).unwrap();
                            heap = h;
                        }
                    }
                }
            }
        })
    }
}
