/// vcircuit Error Types
///
/// Errors raised by the messaging substrate: buses, transports, queues and
/// virtual circuits.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for substrate operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error on an underlying connection
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A bounded wait elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Operation requires an established circuit
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The transport, queue or circuit has been destroyed
    #[error("Closed: {0}")]
    Closed(String),

    /// The virtual circuit has lost or closed its peer session
    #[error("Circuit disconnected: {0}")]
    Disconnected(String),

    /// Circuit already bound to a peer
    #[error("Circuit already connected")]
    AlreadyConnected,

    /// Subject failed validation
    #[error("Invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },

    /// Message field missing or of another type
    #[error("Field '{name}': {reason}")]
    Field { name: String, reason: String },

    /// Encoding / decoding failure on the wire
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type alias for substrate operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create an invalid subject error
    pub fn invalid_subject(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSubject {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a field error
    pub fn field(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-connected error
    pub fn not_connected(what: impl Into<String>) -> Self {
        Self::NotConnected(what.into())
    }

    /// Create a closed error
    pub fn closed(what: impl Into<String>) -> Self {
        Self::Closed(what.into())
    }

    /// Create a circuit-disconnected error
    pub fn disconnected(what: impl Into<String>) -> Self {
        Self::Disconnected(what.into())
    }

    /// Check if this error is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Check if this is a connection error
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::Closed(_) | Self::Disconnected(_)
        )
    }

    /// Check if a virtual circuit refused the operation because its session
    /// is already over
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}
