//!
//! oracle.rs
//! The local-user approval prompt described as an external collaborator in
//! SPEC_FULL.md section 6 (`askUser`): a blocking call that returns a
//! boolean for a given composite image plus source list.
//!
use std::io::{self, Write};

pub trait UserOracle: Send + Sync {
    fn ask(&self, image_bytes: &[u8], filenames: &[String]) -> bool;
}

///
/// AutoApproveOracle
/// Always approves. Used by the test suite and by `--auto-approve` for
/// unattended demos.
///
pub struct AutoApproveOracle;

impl UserOracle for AutoApproveOracle {
    fn ask(&self, _image_bytes: &[u8], _filenames: &[String]) -> bool {
        true
    }
}

///
/// AutoRejectOracle
/// Always rejects. Used by tests that need a deterministic NO vote (see
/// end-to-end scenario 2).
///
pub struct AutoRejectOracle;

impl UserOracle for AutoRejectOracle {
    fn ask(&self, _image_bytes: &[u8], _filenames: &[String]) -> bool {
        false
    }
}

///
/// StdinOracle
/// Prints the composite size and source list, blocks on a line of stdin,
/// and treats "y"/"yes" (case-insensitive) as approval.
///
pub struct StdinOracle;

impl UserOracle for StdinOracle {
    fn ask(&self, image_bytes: &[u8], filenames: &[String]) -> bool {
        println!(
            "approve collage commit? {} source file(s), {} composite bytes: {:?} [y/N]",
            filenames.len(),
            image_bytes.len(),
            filenames
        );
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
