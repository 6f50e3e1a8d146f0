/// Development helper: initialize a tracing subscriber when `RUST_LOG` is set.
///
/// Tests call `vcircuit::dev_tracing::init_tracing()` to get structured logs
/// while debugging. No-op when `RUST_LOG` is unset or a global subscriber is
/// already installed.
pub fn init_tracing() {
    use std::env;

    if env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Subscriber for the command-line programs: `info` unless `RUST_LOG` says
/// otherwise.
pub fn init_cli_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
