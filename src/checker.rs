//!
//! checker.rs
//! Tools for checking the audit logs produced by a run for the invariants
//! in SPEC_FULL.md section 8. Exports check_last_run, which loads the
//! coordinator's and every participant's audit trail from a directory and
//! checks that committed/aborted outcomes agree.
//!
use std::collections::HashSet;

use crate::oplog::OpLog;

fn txids_for_event(log: &OpLog, event: &str) -> HashSet<String> {
    let lock = log.arc();
    let entries = lock.lock().unwrap();
    entries
        .values()
        .filter(|r| r.event == event)
        .map(|r| r.txid.clone())
        .collect()
}

///
/// check_participant()
/// A participant must never show COMMIT for a txid the coordinator
/// aborted, and must never show ABORT for a txid the coordinator
/// committed -- that would be a mixed outcome, which atomicity forbids.
///
fn check_participant(
    name: &str,
    coord_committed: &HashSet<String>,
    coord_aborted: &HashSet<String>,
    participant_log: &OpLog,
) -> bool {
    let local_commit = txids_for_event(participant_log, "COMMIT");
    let local_abort = txids_for_event(participant_log, "ABORT");
    let local_vote_commit = txids_for_event(participant_log, "VOTE_COMMIT");

    let mut ok = true;

    for txid in &local_commit {
        if coord_aborted.contains(txid) {
            println!("{} FAIL: locally COMMITted txn {} that coordinator ABORTED", name, txid);
            ok = false;
        }
    }
    for txid in &local_abort {
        if coord_committed.contains(txid) {
            println!("{} FAIL: locally ABORTed txn {} that coordinator COMMITTED", name, txid);
            ok = false;
        }
    }
    // Every transaction the coordinator committed that this participant
    // knew about at all (it voted commit) must show a local COMMIT -- the
    // coordinator only reaches COMMITTED once every participant has ACKed.
    for txid in coord_committed.intersection(&local_vote_commit) {
        if !local_commit.contains(txid) {
            println!(
                "{} FAIL: voted commit on txn {} which coordinator committed, but never applied it locally",
                name, txid
            );
            ok = false;
        }
    }

    if ok {
        println!(
            "{} OK: {} local commits, {} local aborts, consistent with coordinator",
            name,
            local_commit.len(),
            local_abort.len()
        );
    }
    ok
}

///
/// check_last_run()
/// `log_path` is the directory holding `coordinator.audit.log` and
/// `participant_<id>.audit.log` for ids 0..num_participants.
///
pub fn check_last_run(num_participants: u32, log_path: &str) -> bool {
    info!("checking collage 2PC run: {} participants", num_participants);

    let coord_log = OpLog::from_file(&format!("{}/coordinator.audit.log", log_path));
    let committed = txids_for_event(&coord_log, "COMMITTED");
    let aborted = txids_for_event(&coord_log, "ABORTED");

    let mut ok = true;
    for pid in 0..num_participants {
        let name = format!("participant_{}", pid);
        let participant_log = OpLog::from_file(&format!("{}/{}.audit.log", log_path, name));
        ok &= check_participant(&name, &committed, &aborted, &participant_log);
    }
    ok
}
