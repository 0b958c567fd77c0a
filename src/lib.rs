//!
//! collage2pc
//! A distributed atomic-commit protocol for collage commits: one
//! coordinator and up to four participants agree, via two-phase commit,
//! on whether to create a composite image from source images the
//! participants own, deleting the sources only once the composite is
//! durably written.
//!
#[macro_use]
extern crate log;

pub mod checker;
pub mod cliopts;
pub mod coordinator;
pub mod durable_log;
pub mod error;
pub mod imagestore;
pub mod message;
pub mod oplog;
pub mod oracle;
pub mod participant;
pub mod participant_state;
pub mod retry;
pub mod transaction;
pub mod transport;

pub use coordinator::Coordinator;
pub use participant::Participant;
