//! Circuit lifecycle advisories.
//!
//! A virtual circuit reports lifecycle changes to listeners on its own
//! transport as ordinary messages on reserved `_VC.` subjects, each carrying
//! a `reason` string field.

use crate::message::Message;
use crate::subject::Subject;
use once_cell::sync::Lazy;
use std::fmt;

/// Published when the peer confirms the circuit.
pub const CONNECTED: &str = "_VC.INFO.SYSTEM.CIRCUIT.CONNECTED";

/// Published once when the circuit is lost or closed.
pub const DISCONNECTED: &str = "_VC.WARN.SYSTEM.CIRCUIT.DISCONNECTED";

/// Pattern matching the disconnect advisory at any severity.
pub const DISCONNECTED_PATTERN: &str = "_VC.*.SYSTEM.CIRCUIT.DISCONNECTED";

/// Field carrying the human-readable cause.
pub const REASON_FIELD: &str = "reason";

static CONNECTED_SUBJECT: Lazy<Subject> =
    Lazy::new(|| Subject::literal(CONNECTED).unwrap_or_else(|_| unreachable!()));
static DISCONNECTED_SUBJECT: Lazy<Subject> =
    Lazy::new(|| Subject::literal(DISCONNECTED).unwrap_or_else(|_| unreachable!()));
static DISCONNECTED_PATTERN_SUBJECT: Lazy<Subject> =
    Lazy::new(|| Subject::parse(DISCONNECTED_PATTERN).unwrap_or_else(|_| unreachable!()));

/// Pattern for subscribing to disconnect advisories.
#[must_use]
pub fn disconnected_pattern() -> Subject {
    DISCONNECTED_PATTERN_SUBJECT.clone()
}

/// Circuit lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitEvent {
    /// Peer confirmed the circuit.
    Connected,

    /// Circuit lost or closed.
    Disconnected { reason: String },
}

impl CircuitEvent {
    /// Subject this event is published on.
    #[must_use]
    pub fn subject(&self) -> Subject {
        match self {
            Self::Connected => CONNECTED_SUBJECT.clone(),
            Self::Disconnected { .. } => DISCONNECTED_SUBJECT.clone(),
        }
    }

    /// Render as an advisory message.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let reason = match self {
            Self::Connected => "peer confirmed".to_string(),
            Self::Disconnected { reason } => reason.clone(),
        };
        Message::to(self.subject()).with_string(REASON_FIELD, reason)
    }

    /// Parse an advisory message. Returns `None` for anything else.
    #[must_use]
    pub fn from_message(msg: &Message) -> Option<Self> {
        let subject = msg.send_subject()?;
        let reason = msg.get_string(REASON_FIELD).unwrap_or_default();
        if *subject == *CONNECTED_SUBJECT {
            Some(Self::Connected)
        } else if DISCONNECTED_PATTERN_SUBJECT.matches(subject) {
            Some(Self::Disconnected { reason })
        } else {
            None
        }
    }
}

impl fmt::Display for CircuitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Circuit connected"),
            Self::Disconnected { reason } => write!(f, "Circuit disconnected: {reason}"),
        }
    }
}
