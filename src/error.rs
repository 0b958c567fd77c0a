//!
//! error.rs
//! Error kinds for the fallible concerns enumerated in SPEC_FULL.md section 7.
//! Only the outermost loop in each role ever converts these to a log line;
//! everywhere else they propagate with `?`.
//!
extern crate thiserror;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to write durable snapshot to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read durable snapshot from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot at {path} is corrupt and is being discarded: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: Box<bincode::ErrorKind>,
    },
}

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("source image not found: {0}")]
    NotFound(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no route to address {0}")]
    UnknownAddress(String),
    #[error("send to {address} failed: {reason}")]
    SendFailed { address: String, reason: String },
    #[error("malformed envelope: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to decode envelope: {0}")]
    Decode(String),
    #[error("unrecognized message tag: {0}")]
    UnknownTag(String),
}
