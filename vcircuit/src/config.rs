//! Run configuration and command-line parsing.
//!
//! Configurations are built once at startup and read-only afterwards. The
//! command line uses single-dash flags:
//!
//! ```text
//! vcclient [-service <service>] [-network <network>] [-daemon <daemon>]
//!          [-interval <secs>] [-status <n>] [-timeout <secs>] [<requests>]
//! ```

use crate::error::{BenchError, Result};
use std::time::Duration;
use vcircuit_core::options::{CircuitOptions, TransportOptions, DEFAULT_DAEMON};

/// Subject servers listen on for locate requests.
pub const DISCOVERY_SUBJECT: &str = "VCIRCUIT.LOCATE";

/// Subject requests are addressed to on the circuit.
pub const REQUEST_SUBJECT: &str = "VCIRCUIT.WORK";

/// Prefix of the per-session response subject.
pub const RESPONSE_SUBJECT: &str = "VCIRCUIT.REPLY";

pub const CLIENT_USAGE: &str = "\
usage: vcclient [-service <service>] [-network <network>]
                [-daemon <daemon>]   [-interval <secs>]
                [-status <#msgs>]    [-timeout <secs>]  [<number of requests>]";

pub const SERVER_USAGE: &str = "\
usage: vcserver [-service <service>] [-network <network>]
                [-daemon <daemon>]   [-status <#msgs>]";

pub const DAEMON_USAGE: &str = "usage: vcdaemon [-daemon <[host:]port>]";

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<T> {
    /// Run with this configuration.
    Run(T),
    /// Print usage and exit.
    Help,
}

/// Client run configuration.
///
/// # Examples
///
/// ```
/// use vcircuit::config::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_requests(500)
///     .with_interval(Duration::from_millis(10))
///     .with_status_frequency(100);
///
/// assert_eq!(config.requests, 500);
/// assert!(config.is_paced());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Number of requests to send
    /// - Default: 10000
    pub requests: u32,

    /// Delay between requests
    /// - Default: 0 (burst mode)
    pub interval: Duration,

    /// Print a status line every `status_frequency` messages
    /// - Default: 0 (disabled)
    pub status_frequency: u32,

    /// How long to wait for a server to answer the locate request
    /// - Default: 60s
    pub discovery_timeout: Duration,

    /// How long to wait for the server to confirm the circuit
    /// - Default: 20s
    pub connect_timeout: Duration,

    /// Bound on the whole run, from the first request to completion
    /// - `None`: wait indefinitely (default)
    pub run_timeout: Option<Duration>,

    pub discovery_subject: String,
    pub request_subject: String,
    pub response_subject: String,

    pub transport: TransportOptions,
    pub circuit: CircuitOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests: 10_000,
            interval: Duration::ZERO,
            status_frequency: 0,
            discovery_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(20),
            run_timeout: None,
            discovery_subject: DISCOVERY_SUBJECT.to_string(),
            request_subject: REQUEST_SUBJECT.to_string(),
            response_subject: RESPONSE_SUBJECT.to_string(),
            transport: TransportOptions::default().with_description("vcclient"),
            circuit: CircuitOptions::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_requests(mut self, requests: u32) -> Self {
        self.requests = requests;
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_status_frequency(mut self, every: u32) -> Self {
        self.status_frequency = every;
        self
    }

    #[must_use]
    pub const fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitOptions) -> Self {
        self.circuit = circuit;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Whether requests are timer-driven rather than sent back to back.
    #[must_use]
    pub fn is_paced(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Print a status line every `status_frequency` processed requests
    /// - Default: 0 (disabled)
    pub status_frequency: u32,

    /// Exit after this long without any traffic
    /// - Default: 120s
    pub idle_timeout: Duration,

    pub discovery_subject: String,
    pub request_subject: String,

    pub transport: TransportOptions,
    pub circuit: CircuitOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            status_frequency: 0,
            idle_timeout: Duration::from_secs(120),
            discovery_subject: DISCOVERY_SUBJECT.to_string(),
            request_subject: REQUEST_SUBJECT.to_string(),
            transport: TransportOptions::default().with_description("vcserver"),
            circuit: CircuitOptions::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn with_status_frequency(mut self, every: u32) -> Self {
        self.status_frequency = every;
        self
    }

    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitOptions) -> Self {
        self.circuit = circuit;
        self
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Address to listen on (`7500`, `host:7500`, `tcp:host:7500`)
    pub listen: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_DAEMON.to_string(),
        }
    }
}

/// Parse `vcclient` arguments (program name excluded).
pub fn parse_client_args<I, S>(args: I) -> Result<Command<ClientConfig>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = ClientConfig::default();
    let mut requests = None;
    let mut args = args.into_iter().map(|a| a.as_ref().to_string());

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "-help" | "?" | "-?" => return Ok(Command::Help),
            "-service" | "-network" | "-daemon" => {
                let value = next_value(&mut args, &arg)?;
                apply_transport_flag(&mut config.transport, &arg, value);
            }
            "-interval" => config.interval = parse_secs(&next_value(&mut args, &arg)?, &arg)?,
            "-status" => config.status_frequency = parse_count(&next_value(&mut args, &arg)?, &arg)?,
            "-timeout" => {
                let timeout = parse_secs(&next_value(&mut args, &arg)?, &arg)?;
                config.run_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            flag if is_flag(flag) => return Err(BenchError::usage(format!("unknown option '{flag}'"))),
            count => {
                if requests.is_some() {
                    return Err(BenchError::usage(format!("unexpected argument '{count}'")));
                }
                requests = Some(parse_count(count, "request count")?);
            }
        }
    }

    if let Some(requests) = requests {
        config.requests = requests;
    }
    Ok(Command::Run(config))
}

/// Parse `vcserver` arguments (program name excluded).
pub fn parse_server_args<I, S>(args: I) -> Result<Command<ServerConfig>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = ServerConfig::default();
    let mut args = args.into_iter().map(|a| a.as_ref().to_string());

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "-help" | "?" | "-?" => return Ok(Command::Help),
            "-service" | "-network" | "-daemon" => {
                let value = next_value(&mut args, &arg)?;
                apply_transport_flag(&mut config.transport, &arg, value);
            }
            "-status" => config.status_frequency = parse_count(&next_value(&mut args, &arg)?, &arg)?,
            other => return Err(BenchError::usage(format!("unexpected argument '{other}'"))),
        }
    }

    Ok(Command::Run(config))
}

/// Parse `vcdaemon` arguments (program name excluded).
pub fn parse_daemon_args<I, S>(args: I) -> Result<Command<DaemonConfig>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = DaemonConfig::default();
    let mut args = args.into_iter().map(|a| a.as_ref().to_string());

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "-help" | "?" | "-?" => return Ok(Command::Help),
            "-daemon" => config.listen = next_value(&mut args, &arg)?,
            other => return Err(BenchError::usage(format!("unexpected argument '{other}'"))),
        }
    }

    Ok(Command::Run(config))
}

fn apply_transport_flag(options: &mut TransportOptions, flag: &str, value: String) {
    match flag {
        "-service" => options.service = Some(value),
        "-network" => options.network = Some(value),
        "-daemon" => options.daemon = Some(value),
        _ => {}
    }
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| BenchError::usage(format!("option '{flag}' needs a value")))
}

fn is_flag(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-')
}

fn parse_secs(value: &str, what: &str) -> Result<Duration> {
    let secs: f64 = value
        .parse()
        .map_err(|_| BenchError::usage(format!("{what}: '{value}' is not a number of seconds")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| BenchError::usage(format!("{what}: '{value}' is out of range")))
}

fn parse_count(value: &str, what: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| BenchError::usage(format!("{what}: '{value}' is not a count")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(args: &[&str]) -> ClientConfig {
        match parse_client_args(args).unwrap() {
            Command::Run(config) => config,
            Command::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn test_client_defaults() {
        let config = client(&[]);
        assert_eq!(config.requests, 10_000);
        assert!(!config.is_paced());
        assert_eq!(config.status_frequency, 0);
        assert_eq!(config.discovery_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert!(config.run_timeout.is_none());
    }

    #[test]
    fn test_client_flags() {
        let config = client(&[
            "-service", "7725", "-network", "127.0.0.1", "-daemon", "7505", "-interval", ".01",
            "-status", "1000", "-timeout", "30", "20000",
        ]);
        assert_eq!(config.transport.service.as_deref(), Some("7725"));
        assert_eq!(config.transport.network.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.transport.daemon.as_deref(), Some("7505"));
        assert_eq!(config.interval, Duration::from_millis(10));
        assert_eq!(config.status_frequency, 1000);
        assert_eq!(config.run_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.requests, 20_000);
    }

    #[test]
    fn test_help() {
        for flag in ["-h", "-help", "?"] {
            assert!(matches!(parse_client_args([flag]).unwrap(), Command::Help));
            assert!(matches!(parse_server_args([flag]).unwrap(), Command::Help));
        }
    }

    #[test]
    fn test_usage_errors() {
        assert!(matches!(parse_client_args(["-interval"]), Err(BenchError::Usage(_))));
        assert!(matches!(parse_client_args(["-interval", "-1"]), Err(BenchError::Usage(_))));
        assert!(matches!(parse_client_args(["-status", "x"]), Err(BenchError::Usage(_))));
        assert!(matches!(parse_client_args(["-bogus"]), Err(BenchError::Usage(_))));
        assert!(matches!(parse_client_args(["10", "20"]), Err(BenchError::Usage(_))));
        assert!(matches!(parse_server_args(["10"]), Err(BenchError::Usage(_))));
    }

    #[test]
    fn test_server_and_daemon() {
        let Command::Run(config) = parse_server_args(["-service", "7522", "-status", "5"]).unwrap()
        else {
            panic!("expected run");
        };
        assert_eq!(config.status_frequency, 5);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.transport.service.as_deref(), Some("7522"));

        let Command::Run(config) = parse_daemon_args(["-daemon", "tcp:7600"]).unwrap() else {
            panic!("expected run");
        };
        assert_eq!(config.listen, "tcp:7600");
        assert_eq!(
            parse_daemon_args(Vec::<String>::new()).unwrap(),
            Command::Run(DaemonConfig::default())
        );
    }
}
