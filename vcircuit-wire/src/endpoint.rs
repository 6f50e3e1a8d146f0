//! Daemon address parsing.
//!
//! Accepted forms (the `-daemon` flag):
//! - `7500` (port on the local host)
//! - `host:7500`
//! - `tcp:7500`
//! - `tcp:host:7500`
//! - empty string (the default daemon)

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use vcircuit_core::options::DEFAULT_DAEMON;

const DEFAULT_HOST: &str = "127.0.0.1";

/// Host and port of a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DaemonAddr {
    pub host: String,
    pub port: u16,
}

impl DaemonAddr {
    /// Parse a daemon address.
    ///
    /// # Examples
    ///
    /// ```
    /// use vcircuit_wire::endpoint::DaemonAddr;
    ///
    /// let addr = DaemonAddr::parse("tcp:7522").unwrap();
    /// assert_eq!(addr.to_string(), "127.0.0.1:7522");
    ///
    /// let addr = DaemonAddr::parse("tcp:broker.local:7500").unwrap();
    /// assert_eq!(addr.host, "broker.local");
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Resolve to the first socket address.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("daemon host '{}' did not resolve", self.host),
                )
            })
    }
}

impl Default for DaemonAddr {
    fn default() -> Self {
        DEFAULT_DAEMON
            .parse()
            .unwrap_or_else(|_| unreachable!("default daemon address is valid"))
    }
}

impl FromStr for DaemonAddr {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        if s.contains("://") {
            return Err(EndpointError::InvalidScheme(s.to_string()));
        }
        let rest = s.strip_prefix("tcp:").unwrap_or(s);

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => (host, port),
            Some(_) => return Err(EndpointError::MissingHost(s.to_string())),
            None => (DEFAULT_HOST, rest),
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(port.to_string()))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

impl fmt::Display for DaemonAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Errors that can occur when parsing daemon addresses.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Unsupported daemon address scheme: {0} (expected tcp:)")]
    InvalidScheme(String),

    #[error("Invalid daemon port: {0}")]
    InvalidPort(String),

    #[error("Missing host in daemon address: {0}")]
    MissingHost(String),
}
