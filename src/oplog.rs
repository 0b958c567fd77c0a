//!
//! oplog.rs
//! The append-only human-readable audit trail described in SPEC_FULL.md
//! section 4.3. This is *not* the durable log used for crash recovery (see
//! durable_log.rs) -- it exists so checker.rs and operators can reconstruct
//! the history of a run after the fact.
//!
extern crate serde_json;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::Mutex;

use crate::message::AuditRecord;

#[derive(Debug)]
pub struct OpLog {
    entries: Arc<Mutex<HashMap<u32, AuditRecord>>>,
    lf: File,
}

impl OpLog {
    ///
    /// new(fpath)
    /// Opens (creating if necessary) the audit log at the given path in
    /// append mode.
    ///
    pub fn new(fpath: &str) -> OpLog {
        let lf = OpenOptions::new()
            .create(true)
            .append(true)
            .open(fpath)
            .unwrap_or_else(|e| panic!("unable to open audit log {}: {}", fpath, e));
        OpLog {
            entries: Arc::new(Mutex::new(HashMap::new())),
            lf,
        }
    }

    ///
    /// from_file(fpath)
    /// Reads in and returns an existing audit log from the designated file.
    ///
    pub fn from_file(fpath: &str) -> OpLog {
        let mut entries = HashMap::new();
        if let Ok(f) = File::open(fpath) {
            let mut reader = BufReader::new(&f);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                if let Some(rec) = AuditRecord::from_line(line.trim_end()) {
                    entries.insert(rec.uid, rec);
                }
                line.clear();
            }
        }
        let lf = OpenOptions::new()
            .create(true)
            .append(true)
            .open(fpath)
            .unwrap_or_else(|e| panic!("unable to open audit log {}: {}", fpath, e));
        OpLog {
            entries: Arc::new(Mutex::new(entries)),
            lf,
        }
    }

    ///
    /// append(role, txid, event)
    /// Appends an entry to the audit log.
    ///
    pub fn append(&mut self, role: &str, txid: &str, event: &str) {
        let rec = AuditRecord::generate(role.to_string(), txid.to_string(), event.to_string());
        if let Ok(line) = serde_json::to_string(&rec) {
            let _ = writeln!(&mut self.lf, "{}", line);
            let _ = self.lf.flush();
        }
        let lck = Arc::clone(&self.entries);
        let mut log = lck.lock().unwrap();
        log.insert(rec.uid, rec);
    }

    ///
    /// arc()
    /// Returns an Arc to the mutex-guarded in-memory view of the log, for
    /// readers (checker.rs) that want to scan the whole history.
    ///
    pub fn arc(&self) -> Arc<Mutex<HashMap<u32, AuditRecord>>> {
        Arc::clone(&self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_visible_through_arc_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut log = OpLog::new(path.to_str().unwrap());
        log.append("coordinator", "txn-1", "PREPARING");
        log.append("coordinator", "txn-1", "COMMITTED");

        let entries = log.arc();
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.values().any(|r| r.event == "COMMITTED" && r.txid == "txn-1"));
    }

    #[test]
    fn from_file_replays_previously_appended_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let mut log = OpLog::new(path.to_str().unwrap());
            log.append("participant_0", "txn-1", "VOTE_COMMIT");
            log.append("participant_0", "txn-1", "COMMIT");
        }

        let replayed = OpLog::from_file(path.to_str().unwrap());
        let entries = replayed.arc();
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn from_file_on_a_missing_path_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never_written.log");
        let log = OpLog::from_file(path.to_str().unwrap());
        assert!(log.arc().lock().unwrap().is_empty());
    }
}
