//!
//! coordinator binary
//! CLI surface from SPEC_FULL.md section 6: `<program> <port>`. Accepts
//! commit requests as JSON lines on stdin -- `{"filename": "...",
//! "image_path": "...", "sources": ["A:a1.jpg", ...]}` -- since originating
//! commit proposals is an external collaborator's job (section 1), not the
//! coordinator's; this stdin loop is just a minimal demo driver for it.
//!
extern crate ctrlc;
#[macro_use]
extern crate log;
extern crate serde;
extern crate serde_json;

use std::fs;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use collage2pc::cliopts::{self, CoordinatorOptions};
use collage2pc::coordinator::Coordinator;
use collage2pc::transport::{Transport, TcpTransport};

#[derive(serde::Deserialize)]
struct CommitRequest {
    filename: String,
    image_path: String,
    sources: Vec<String>,
}

fn main() {
    let opts = CoordinatorOptions::parse();
    cliopts::init_logging(opts.verbosity);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("coordinator: shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })
        .unwrap_or(());
    }

    fs::create_dir_all(&opts.log_path).unwrap_or_else(|e| {
        eprintln!("fatal: could not create log directory {}: {}", opts.log_path, e);
        std::process::exit(1);
    });

    let listen_addr = format!("127.0.0.1:{}", opts.port);
    let (transport, msg_rx) = TcpTransport::bind(&listen_addr).unwrap_or_else(|e| {
        eprintln!("fatal: could not bind {}: {}", listen_addr, e);
        std::process::exit(1);
    });
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let coordinator = Arc::new(Coordinator::new(
        "coordinator".to_string(),
        &format!("{}/coordinator.snapshot", opts.log_path),
        &format!("{}/coordinator.audit.log", opts.log_path),
        &format!("{}/coordinator_images", opts.log_path),
        transport,
        running.clone(),
    ));

    info!(
        "coordinator: listening on {} with {} configured peer(s)",
        listen_addr,
        opts.peers.len()
    );

    let protocol_coordinator = coordinator.clone();
    let protocol_thread = std::thread::spawn(move || protocol_coordinator.run(msg_rx));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: CommitRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("coordinator: ignoring unparseable commit request: {}", e);
                continue;
            }
        };
        let image_bytes = match fs::read(&request.image_path) {
            Ok(b) => b,
            Err(e) => {
                warn!("coordinator: could not read {}: {}", request.image_path, e);
                continue;
            }
        };
        let txn_id = coordinator.start_commit(request.filename, image_bytes, request.sources);
        println!("{}", txn_id);
    }

    running.store(false, Ordering::SeqCst);
    let _ = protocol_thread.join();
}
