//!
//! participant binary
//! CLI surface from SPEC_FULL.md section 6: `<program> <port> <id>`.
//!
extern crate ctrlc;
#[macro_use]
extern crate log;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use collage2pc::cliopts::{self, ParticipantOptions};
use collage2pc::oracle::{AutoApproveOracle, StdinOracle, UserOracle};
use collage2pc::participant::Participant;
use collage2pc::transport::{TcpTransport, Transport};

fn main() {
    let opts = ParticipantOptions::parse();
    cliopts::init_logging(opts.verbosity);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("participant: shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })
        .unwrap_or(());
    }

    let id_str = format!("participant_{}", opts.id);
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

    let oracle: Arc<dyn UserOracle> = if opts.auto_approve {
        Arc::new(AutoApproveOracle)
    } else {
        Arc::new(StdinOracle)
    };

    let participant = Arc::new(Participant::new(
        id_str.clone(),
        &format!("{}/{}.snapshot", opts.log_path, id_str),
        &format!("{}/{}.audit.log", opts.log_path, id_str),
        &format!("{}/{}_images", opts.log_path, id_str),
        transport,
        oracle,
        opts.coordinator.clone(),
        running,
    ));

    info!(
        "{}: listening on {}, coordinator at {}",
        id_str, listen_addr, opts.coordinator
    );

    participant.run(msg_rx);
}
