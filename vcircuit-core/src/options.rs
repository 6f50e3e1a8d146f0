//! Transport and circuit configuration options
//!
//! `TransportOptions` carries the addressing parameters handed to the bus
//! (service / network / daemon) and the daemon connection policy.
//! `CircuitOptions` controls virtual-circuit liveness.

use std::time::Duration;

/// Default daemon address (`host:port`).
pub const DEFAULT_DAEMON: &str = "127.0.0.1:7500";

/// Transport configuration options.
///
/// # Examples
///
/// ```
/// use vcircuit_core::options::TransportOptions;
/// use std::time::Duration;
///
/// let opts = TransportOptions::default()
///     .with_service("7522")
///     .with_daemon("localhost:7500")
///     .with_connect_attempts(5);
///
/// assert_eq!(opts.service.as_deref(), Some("7522"));
/// assert_eq!(opts.connect_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Service name. Only clients on the same service exchange messages.
    /// - `None`: default service
    pub service: Option<String>,

    /// Network specification, forwarded to the daemon.
    /// - `None`: default network
    pub network: Option<String>,

    /// Daemon address (`7500`, `host:7500`, `tcp:host:7500`)
    /// - `None`: [`DEFAULT_DAEMON`]
    pub daemon: Option<String>,

    /// Human-readable description reported to the daemon
    pub description: String,

    /// Number of attempts to reach the daemon before giving up
    /// - Default: 3
    pub connect_attempts: u32,

    /// Initial delay between daemon connection attempts
    /// - Default: 100ms
    pub reconnect_ivl: Duration,

    /// Maximum delay between attempts (exponential backoff cap)
    /// - Default: 2s
    /// - `Duration::ZERO`: no backoff, always use `reconnect_ivl`
    pub reconnect_ivl_max: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            service: None,
            network: None,
            daemon: None,
            description: String::new(),
            connect_attempts: 3,
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::from_secs(2),
        }
    }
}

impl TransportOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    #[must_use]
    pub fn with_daemon(mut self, daemon: impl Into<String>) -> Self {
        self.daemon = Some(daemon.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    #[must_use]
    pub const fn with_reconnect_ivl_max(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl_max = ivl;
        self
    }

    /// Service name with the default applied.
    #[must_use]
    pub fn service_or_default(&self) -> &str {
        self.service.as_deref().unwrap_or("")
    }

    /// Daemon address with the default applied.
    #[must_use]
    pub fn daemon_or_default(&self) -> &str {
        self.daemon.as_deref().unwrap_or(DEFAULT_DAEMON)
    }
}

/// Virtual-circuit liveness options.
#[derive(Debug, Clone)]
pub struct CircuitOptions {
    /// Interval between heartbeats sent to the peer while connected
    /// - Default: 1s
    pub heartbeat_ivl: Duration,

    /// Number of heartbeat intervals without traffic before the peer is
    /// declared lost
    /// - Default: 3
    pub missed_heartbeats: u32,
}

impl Default for CircuitOptions {
    fn default() -> Self {
        Self {
            heartbeat_ivl: Duration::from_secs(1),
            missed_heartbeats: 3,
        }
    }
}

impl CircuitOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_heartbeat_ivl(mut self, ivl: Duration) -> Self {
        self.heartbeat_ivl = ivl;
        self
    }

    #[must_use]
    pub const fn with_missed_heartbeats(mut self, missed: u32) -> Self {
        self.missed_heartbeats = missed;
        self
    }

    /// Silence after which the peer is declared lost.
    #[must_use]
    pub fn peer_timeout(&self) -> Duration {
        self.heartbeat_ivl * self.missed_heartbeats.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_defaults() {
        let opts = TransportOptions::default();
        assert_eq!(opts.service_or_default(), "");
        assert_eq!(opts.daemon_or_default(), DEFAULT_DAEMON);
        assert_eq!(opts.connect_attempts, 3);
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(100));
    }

    #[test]
    fn test_circuit_peer_timeout() {
        let opts = CircuitOptions::new()
            .with_heartbeat_ivl(Duration::from_millis(50))
            .with_missed_heartbeats(4);
        assert_eq!(opts.peer_timeout(), Duration::from_millis(200));

        let opts = CircuitOptions::new().with_missed_heartbeats(0);
        assert_eq!(opts.peer_timeout(), Duration::from_secs(1));
    }
}
