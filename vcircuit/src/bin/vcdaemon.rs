//! `vcdaemon`: the message daemon clients and servers connect through.

use std::process::ExitCode;
use tracing::{error, info};
use vcircuit::config::{parse_daemon_args, Command, DAEMON_USAGE};
use vcircuit::dev_tracing::init_cli_tracing;
use vcircuit_wire::Daemon;

fn main() -> ExitCode {
    init_cli_tracing();

    let config = match parse_daemon_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            eprintln!("{DAEMON_USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("vcdaemon: {e}\n{DAEMON_USAGE}");
            return ExitCode::from(e.exit_code());
        }
    };

    let result = compio::runtime::Runtime::new().and_then(|rt| {
        rt.block_on(async {
            let daemon = Daemon::bind(&config.listen).await?;
            info!(addr = %daemon.local_addr(), "vcdaemon ready");
            daemon.run().await
        })
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "vcdaemon stopped");
            ExitCode::FAILURE
        }
    }
}
