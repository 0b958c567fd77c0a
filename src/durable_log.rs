//!
//! durable_log.rs
//! The durable log described in SPEC_FULL.md section 4.3: a single file per
//! role holding a full snapshot of that role's state. Every flush is a
//! complete rewrite -- write to a temp file in the same directory, fsync it,
//! then rename it over the final path -- so recovery always sees either the
//! previous snapshot or the new one, never a torn write.
//!
extern crate bincode;
extern crate serde;

use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::LogError;

pub struct DurableLog<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> DurableLog<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new<P: AsRef<Path>>(path: P) -> DurableLog<T> {
        DurableLog {
            path: path.as_ref().to_path_buf(),
            _marker: PhantomData,
        }
    }

    ///
    /// write()
    /// Rewrites the snapshot file atomically and flushes it to stable
    /// storage. Must be called before any observable side effect (a sent
    /// message, a disk mutation visible to another peer) per the
    /// "log before send" rule in section 5.
    ///
    pub fn write(&self, snapshot: &T) -> Result<(), LogError> {
        let bytes = bincode::serialize(snapshot).map_err(|e| LogError::Corrupt {
            path: self.path.display().to_string(),
            source: e,
        })?;

        let tmp_path = self.path.with_extension("snapshot.tmp");
        let mut tmp = File::create(&tmp_path).map_err(|e| LogError::Write {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        tmp.write_all(&bytes).map_err(|e| LogError::Write {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        tmp.sync_all().map_err(|e| LogError::Write {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| LogError::Write {
            path: self.path.display().to_string(),
            source: e,
        })?;

        // Fsync the containing directory too, so the rename itself is durable.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    ///
    /// load()
    /// Replays the last flushed snapshot. A missing file is a fresh start
    /// (returns the default). A corrupt file is reset to the default and a
    /// warning is logged -- per section 7, corruption recovery is
    /// best-effort and never propagated as a hard error.
    ///
    pub fn load(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                let err = LogError::Read {
                    path: self.path.display().to_string(),
                    source: e,
                };
                warn!("{}, starting from empty state", err);
                return T::default();
            }
        };
        match bincode::deserialize(&bytes) {
            Ok(snapshot) => snapshot,
            Err(source) => {
                let err = LogError::Corrupt {
                    path: self.path.display().to_string(),
                    source,
                };
                warn!("{}, resetting to empty state", err);
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, Default, PartialEq, Debug)]
    struct Sample {
        counter: u64,
        names: Vec<String>,
    }

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let log: DurableLog<Sample> = DurableLog::new(dir.path().join("missing.snapshot"));
        assert_eq!(log.load(), Sample::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log: DurableLog<Sample> = DurableLog::new(dir.path().join("state.snapshot"));
        let snapshot = Sample {
            counter: 7,
            names: vec!["a".to_string(), "b".to_string()],
        };
        log.write(&snapshot).unwrap();
        assert_eq!(log.load(), snapshot);
    }

    #[test]
    fn corrupt_file_resets_to_default_instead_of_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.snapshot");
        std::fs::write(&path, b"not a valid bincode snapshot at all").unwrap();
        let log: DurableLog<Sample> = DurableLog::new(&path);
        assert_eq!(log.load(), Sample::default());
    }

    #[test]
    fn second_write_overwrites_the_first_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let log: DurableLog<Sample> = DurableLog::new(dir.path().join("state.snapshot"));
        log.write(&Sample { counter: 1, names: vec![] }).unwrap();
        log.write(&Sample {
            counter: 2,
            names: vec!["x".to_string()],
        })
        .unwrap();
        assert_eq!(
            log.load(),
            Sample {
                counter: 2,
                names: vec!["x".to_string()],
            }
        );
    }
}
