/// Benchmark Error Types
///
/// Every variant is fatal to the current run. None are retried.

use std::time::Duration;
use thiserror::Error;
use vcircuit_core::error::TransportError;

/// Errors ending a client or server run
#[derive(Error, Debug)]
pub enum BenchError {
    /// No server answered the locate request
    #[error("No server located within {0:?}")]
    DiscoveryTimeout(Duration),

    /// The server never confirmed the virtual circuit
    #[error("Virtual circuit not confirmed within {0:?}")]
    ConnectTimeout(Duration),

    /// A request could not be sent
    #[error("Failed to send request {request}: {reason}")]
    SendFailure { request: u32, reason: String },

    /// The virtual circuit was lost before the run completed
    #[error("Virtual circuit disconnected ({reason}): {sent} requests sent, {received} responses received")]
    SessionDisconnected {
        reason: String,
        sent: u32,
        received: u32,
    },

    /// The server saw no traffic for the configured idle period
    #[error("No traffic for {0:?}, server idle")]
    IdleTimeout(Duration),

    /// Substrate failure during setup
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid command line
    #[error("{0}")]
    Usage(String),
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BenchError::DiscoveryTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "No server located within 60s");

        let err = BenchError::SessionDisconnected {
            reason: "closed by peer".into(),
            sent: 100,
            received: 40,
        };
        assert!(err.to_string().contains("100 requests sent, 40 responses received"));
    }

    #[test]
    fn test_transport_conversion() {
        let err: BenchError = TransportError::closed("bus").into();
        assert!(matches!(err, BenchError::Transport(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(BenchError::usage("bad").exit_code(), 2);
    }
}
