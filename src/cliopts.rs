//!
//! cliopts.rs
//! Command line options and trace/log/debug instrumentation for the two
//! collage-2PC binaries. Uses clap to collect positional CLI options per
//! SPEC_FULL.md section 6, and the log + stderrlog crates to initialize
//! trace!()/debug!()/info!() etc.
//!
extern crate clap;
extern crate log;
extern crate shellexpand;
extern crate stderrlog;

use clap::{App, Arg};

///
/// CoordinatorOptions
/// `<program> <port>` with everything else optional and defaulted, so the
/// bare positional invocation named in section 6 works out of the box.
///
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub port: u16,
    pub verbosity: usize,
    pub log_path: String,
    /// "name=host:port" pairs naming every participant this coordinator
    /// will ever propose to.
    pub peers: Vec<(String, String)>,
}

impl CoordinatorOptions {
    pub fn parse() -> CoordinatorOptions {
        let matches = App::new("collage-coordinator")
            .version("0.1.0")
            .about("Collage commit coordinator (two-phase commit)")
            .arg(Arg::with_name("port").required(true).index(1).help("Port to listen on"))
            .arg(
                Arg::with_name("verbosity")
                    .short("v")
                    .takes_value(true)
                    .help("Output verbosity: 0->No Output, 5->Output Everything"),
            )
            .arg(
                Arg::with_name("log_path")
                    .short("l")
                    .long("log-path")
                    .takes_value(true)
                    .help("Directory for the durable log and audit trail"),
            )
            .arg(
                Arg::with_name("peers")
                    .long("peers")
                    .takes_value(true)
                    .help("Comma-separated name=host:port pairs for every participant"),
            )
            .get_matches();

        let port = matches
            .value_of("port")
            .unwrap()
            .parse::<u16>()
            .unwrap_or_else(|_| fatal("port must be a number between 0 and 65535"));
        let verbosity = matches.value_of("verbosity").unwrap_or("0").parse::<usize>().unwrap_or(0);
        let log_path = shellexpand::tilde(matches.value_of("log_path").unwrap_or("./logs/")).to_string();
        let peers = matches
            .value_of("peers")
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split_once('=').map(|(n, a)| (n.to_string(), a.to_string())))
            .collect();

        CoordinatorOptions {
            port,
            verbosity,
            log_path,
            peers,
        }
    }
}

///
/// ParticipantOptions
/// `<program> <port> <id>` with everything else optional.
///
#[derive(Clone, Debug)]
pub struct ParticipantOptions {
    pub port: u16,
    pub id: u32,
    pub verbosity: usize,
    pub log_path: String,
    pub coordinator: String,
    pub auto_approve: bool,
}

impl ParticipantOptions {
    pub fn parse() -> ParticipantOptions {
        let matches = App::new("collage-participant")
            .version("0.1.0")
            .about("Collage commit participant (two-phase commit)")
            .arg(Arg::with_name("port").required(true).index(1).help("Port to listen on"))
            .arg(Arg::with_name("id").required(true).index(2).help("Participant id, used for naming logs/addresses"))
            .arg(
                Arg::with_name("verbosity")
                    .short("v")
                    .takes_value(true)
                    .help("Output verbosity: 0->No Output, 5->Output Everything"),
            )
            .arg(
                Arg::with_name("log_path")
                    .short("l")
                    .long("log-path")
                    .takes_value(true)
                    .help("Directory for the durable log, audit trail, and source images"),
            )
            .arg(
                Arg::with_name("coordinator")
                    .long("coordinator")
                    .takes_value(true)
                    .help("host:port of the coordinator to connect to"),
            )
            .arg(
                Arg::with_name("auto_approve")
                    .long("auto-approve")
                    .takes_value(false)
                    .help("Approve every commit automatically instead of prompting on stdin"),
            )
            .get_matches();

        let port = matches
            .value_of("port")
            .unwrap()
            .parse::<u16>()
            .unwrap_or_else(|_| fatal("port must be a number between 0 and 65535"));
        let id = matches
            .value_of("id")
            .unwrap()
            .parse::<u32>()
            .unwrap_or_else(|_| fatal("id must be a non-negative integer"));
        let verbosity = matches.value_of("verbosity").unwrap_or("0").parse::<usize>().unwrap_or(0);
        let log_path = shellexpand::tilde(matches.value_of("log_path").unwrap_or("./logs/")).to_string();
        let coordinator = matches.value_of("coordinator").unwrap_or("127.0.0.1:9000").to_string();
        let auto_approve = matches.is_present("auto_approve");

        ParticipantOptions {
            port,
            id,
            verbosity,
            log_path,
            coordinator,
            auto_approve,
        }
    }
}

fn fatal(msg: &str) -> ! {
    eprintln!("fatal: {}", msg);
    std::process::exit(1);
}

///
/// init_logging()
/// Wires stderrlog to the log facade at the requested verbosity, matching
/// the reference project's TPCOptions instrumentation.
///
pub fn init_logging(verbosity: usize) {
    stderrlog::new().verbosity(verbosity).init().unwrap_or(());
}
