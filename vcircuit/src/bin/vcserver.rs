//! `vcserver`: answer locate requests with a fresh virtual circuit and add
//! up the numbers clients send on it. Exits after two idle minutes.

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use vcircuit::config::{parse_server_args, Command, ServerConfig, SERVER_USAGE};
use vcircuit::dev_tracing::init_cli_tracing;
use vcircuit::status::LogStatus;
use vcircuit::Server;
use vcircuit_core::transport::Transport;
use vcircuit_wire::DaemonBus;

fn main() -> ExitCode {
    init_cli_tracing();

    let config = match parse_server_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            eprintln!("{SERVER_USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("vcserver: {e}\n{SERVER_USAGE}");
            return ExitCode::from(e.exit_code());
        }
    };

    match run(config) {
        Ok(total) => {
            info!(total, "Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(config: ServerConfig) -> vcircuit::Result<u32> {
    let bus = DaemonBus::connect(&config.transport)?;
    info!(
        daemon = %bus.daemon_addr(),
        service = %config.transport.service_or_default(),
        network = config.transport.network.as_deref().unwrap_or(""),
        "Transport created"
    );
    let transport = Transport::new(bus).with_description("vcserver");

    let server = Server::start(config, &transport, Arc::new(LogStatus))?;
    server.run()
}
