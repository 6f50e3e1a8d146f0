//! `vcclient`: locate a server, open a virtual circuit to it and time a
//! stream of requests.
//!
//! ```bash
//! vcclient -daemon 7500 -status 1000 20000
//! vcclient -daemon localhost:7500 -interval .01 -status 100 500
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use vcircuit::config::{parse_client_args, ClientConfig, Command, CLIENT_USAGE};
use vcircuit::dev_tracing::init_cli_tracing;
use vcircuit::run_client;
use vcircuit::status::LogStatus;
use vcircuit_core::transport::Transport;
use vcircuit_wire::DaemonBus;

fn main() -> ExitCode {
    init_cli_tracing();

    let config = match parse_client_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            eprintln!("{CLIENT_USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("vcclient: {e}\n{CLIENT_USAGE}");
            return ExitCode::from(e.exit_code());
        }
    };

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(config: &ClientConfig) -> vcircuit::Result<u8> {
    let bus = DaemonBus::connect(&config.transport)?;
    let transport = Transport::new(bus).with_description("vcclient");

    let report = run_client(config, &transport, Arc::new(LogStatus))?;
    println!("{report}");
    if let Some(failure) = report.failure() {
        error!("{failure}");
    }
    Ok(report.exit_code())
}
