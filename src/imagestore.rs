//!
//! imagestore.rs
//! Image file I/O, deliberately minimal per SPEC_FULL.md section 1: the
//! system's business is which files get written/deleted, not the image
//! format or any transformation of the bytes. Read/write/delete only.
//!
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ImageStoreError;

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> ImageStore {
        let root = root.as_ref().to_path_buf();
        let _ = fs::create_dir_all(&root);
        ImageStore { root }
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path_for(filename).is_file()
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>, ImageStoreError> {
        let path = self.path_for(filename);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageStoreError::NotFound(filename.to_string())
            } else {
                ImageStoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })
    }

    ///
    /// write()
    /// Idempotent by design (section 4.1): writing the same bytes twice is a
    /// harmless no-op, which is exactly what lets a post-crash retry re-run
    /// the composite write for a transaction already in COMMITTING.
    ///
    pub fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(filename);
        fs::write(&path, bytes).map_err(|e| ImageStoreError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    ///
    /// delete()
    /// A source file already gone (e.g. a re-delivered COMMIT processed
    /// after the first deletion already happened) is not an error -- the
    /// at-most-once effect is enforced one layer up, by the
    /// active_transactions lookup in participant.rs, not here.
    ///
    pub fn delete(&self, filename: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageStoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}
