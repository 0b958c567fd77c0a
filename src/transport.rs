//!
//! transport.rs
//! The message transport described as an external collaborator in
//! SPEC_FULL.md section 6: best-effort, unordered, may drop or duplicate.
//! Two implementations: an in-process bus used by tests (modeled directly
//! on the teacher's map of ipc_channel sender/receiver pairs keyed by
//! participant name) and a real TCP transport used by the coordinator and
//! participant binaries.
//!
extern crate rand;
extern crate serde_json;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;

use crate::error::TransportError;
use crate::message::Envelope;

///
/// Transport
/// send() reports failure via TransportError so the caller can log it, but
/// nothing upstream propagates it further: reliability is the retry
/// engine's job (section 7), not the transport's.
///
pub trait Transport: Send + Sync {
    fn send(&self, to: &str, envelope: Envelope) -> Result<(), TransportError>;
}

///
/// InProcessBus
/// A registry of address -> inbox sender, directly modeled on the teacher's
/// participant_map / client_map of (IpcSender, IpcReceiver) pairs. Used by
/// the unit/integration test harness and by any in-process embedding of
/// both roles (see the design note in SPEC_FULL.md section 9 about explicit
/// role-context objects).
///
pub struct InProcessBus {
    inboxes: Mutex<HashMap<String, Sender<Envelope>>>,
    /// Fraction of sends (0.0-1.0) that are silently dropped, for exercising
    /// the retry engine under message loss (end-to-end scenario 6). Default
    /// 0.0: nothing is dropped.
    drop_rate: f64,
}

impl InProcessBus {
    pub fn new() -> InProcessBus {
        InProcessBus {
            inboxes: Mutex::new(HashMap::new()),
            drop_rate: 0.0,
        }
    }

    pub fn with_drop_rate(drop_rate: f64) -> InProcessBus {
        InProcessBus {
            inboxes: Mutex::new(HashMap::new()),
            drop_rate,
        }
    }

    ///
    /// register()
    /// Creates an inbox for `address` and returns the receiving end. Callers
    /// poll this receiver from their protocol loop.
    ///
    pub fn register(&self, address: &str) -> Receiver<Envelope> {
        let (tx, rx) = mpsc::channel();
        self.inboxes.lock().unwrap().insert(address.to_string(), tx);
        rx
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        InProcessBus::new()
    }
}

impl Transport for InProcessBus {
    fn send(&self, to: &str, envelope: Envelope) -> Result<(), TransportError> {
        if self.drop_rate > 0.0 {
            let roll: f64 = rand::random();
            if roll < self.drop_rate {
                trace!("transport: dropped {} to {} (simulated loss)", envelope.message.tag(), to);
                return Ok(());
            }
        }
        let inboxes = self.inboxes.lock().unwrap();
        match inboxes.get(to) {
            Some(tx) => {
                let _ = tx.send(envelope);
                Ok(())
            }
            None => Err(TransportError::UnknownAddress(to.to_string())),
        }
    }
}

///
/// TcpTransport
/// Backs the coordinator/participant binaries so the CLI surface in section
/// 6 is runnable as two separate OS processes. Envelopes are newline
/// delimited JSON. Outbound connections are opened lazily and cached;
/// a broken connection is dropped and retried on the next send, which is
/// exactly the "best effort, may drop" contract the protocol already
/// tolerates.
///
pub struct TcpTransport {
    outbound: Mutex<HashMap<String, TcpStream>>,
}

impl TcpTransport {
    ///
    /// bind()
    /// Starts listening on `listen_addr` and returns the transport plus the
    /// receiver end of the inbox fed by every accepted connection.
    ///
    pub fn bind(listen_addr: &str) -> std::io::Result<(TcpTransport, Receiver<Envelope>)> {
        let listener = TcpListener::bind(listen_addr)?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let tx = tx.clone();
                        thread::spawn(move || accept_loop(stream, tx));
                    }
                    Err(e) => {
                        warn!("transport: accept failed: {}", e);
                    }
                }
            }
        });
        Ok((
            TcpTransport {
                outbound: Mutex::new(HashMap::new()),
            },
            rx,
        ))
    }
}

fn accept_loop(stream: TcpStream, tx: Sender<Envelope>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        match Envelope::decode(&line) {
            Ok(envelope) => {
                if tx.send(envelope).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("transport: dropping unparseable envelope: {}", e);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: &str, envelope: Envelope) -> Result<(), TransportError> {
        let line = serde_json::to_string(&envelope).map_err(|e| TransportError::Decode(e.to_string()))?;

        let mut outbound = self.outbound.lock().unwrap();
        if !outbound.contains_key(to) {
            match TcpStream::connect(to) {
                Ok(stream) => {
                    outbound.insert(to.to_string(), stream);
                }
                Err(e) => {
                    return Err(TransportError::SendFailed {
                        address: to.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let broken = {
            let stream = outbound.get_mut(to).expect("just inserted or present");
            writeln!(stream, "{}", line).is_err()
        };
        if broken {
            outbound.remove(to);
            return Err(TransportError::SendFailed {
                address: to.to_string(),
                reason: "connection dropped mid-write, will reconnect on next attempt".to_string(),
            });
        }
        Ok(())
    }
}
