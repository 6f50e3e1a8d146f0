//! Per-circuit session bookkeeping shared by the generator, the collector
//! and the monitor.
//!
//! The counters are touched from two threads at once (the sending thread
//! and the response dispatcher), so every update goes through an atomic
//! and returns the value it produced. Status lines key off those returned
//! values, which is what makes each multiple show up exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use vcircuit_core::error::Result;
use vcircuit_core::subject::Subject;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Client-side view of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Initializing = 0,
    Waiting = 1,
    Connected = 2,
    Disconnected = 3,
}

impl SessionState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Initializing,
            1 => Self::Waiting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Waiting => "waiting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Counter snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub sent: u32,
    pub received: u32,
}

/// Shared session record.
#[derive(Debug)]
pub struct Session {
    requested: u32,
    reply_subject: Subject,
    state: AtomicU8,
    sent: AtomicU32,
    received: AtomicU32,
}

impl Session {
    /// New session expecting `requested` responses on a fresh subject under
    /// `response_prefix`.
    pub fn new(requested: u32, response_prefix: &Subject) -> Result<Self> {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let reply_subject = response_prefix
            .child(&std::process::id().to_string())?
            .child(&id.to_string())?;

        Ok(Self {
            requested,
            reply_subject,
            state: AtomicU8::new(SessionState::Initializing as u8),
            sent: AtomicU32::new(0),
            received: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub const fn requested(&self) -> u32 {
        self.requested
    }

    /// Subject responses for this session are addressed to.
    #[must_use]
    pub const fn reply_subject(&self) -> &Subject {
        &self.reply_subject
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.state() == SessionState::Disconnected
    }

    /// Move forward to `next`. Returns false if the session is already at
    /// or past it.
    pub fn advance(&self, next: SessionState) -> bool {
        let next = next as u8;
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| (cur < next).then_some(next))
            .is_ok()
    }

    /// Mark the session disconnected. Only the first call returns true.
    pub fn mark_disconnected(&self) -> bool {
        self.advance(SessionState::Disconnected)
    }

    #[must_use]
    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn received(&self) -> u32 {
        self.received.load(Ordering::Acquire)
    }

    /// Both counters as they stand now.
    #[must_use]
    pub fn tally(&self) -> Tally {
        Tally {
            sent: self.sent(),
            received: self.received(),
        }
    }

    #[must_use]
    pub fn all_sent(&self) -> bool {
        self.sent() >= self.requested
    }

    #[must_use]
    pub fn all_received(&self) -> bool {
        self.received() >= self.requested
    }

    /// Count one sent request. Returns the new total.
    ///
    /// Only the sending thread calls this, after checking
    /// [`all_sent`](Self::all_sent).
    pub fn record_sent(&self) -> u32 {
        self.sent.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count one response. Returns the new total, or `None` if the session
    /// already has every response it expects.
    pub fn record_received(&self) -> Option<u32> {
        let requested = self.requested;
        self.received
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < requested).then(|| n + 1))
            .ok()
            .map(|prev| prev + 1)
    }
}

/// Whether `count` is a status multiple of `every` (0 disables).
#[must_use]
pub const fn is_status_point(count: u32, every: u32) -> bool {
    every > 0 && count > 0 && count % every == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn prefix() -> Subject {
        Subject::literal("VCIRCUIT.REPLY").unwrap()
    }

    #[test]
    fn test_state_moves_forward_only() {
        let session = Session::new(1, &prefix()).unwrap();
        assert_eq!(session.state(), SessionState::Initializing);

        assert!(session.advance(SessionState::Waiting));
        assert!(session.advance(SessionState::Connected));
        assert!(!session.advance(SessionState::Waiting));

        assert!(session.mark_disconnected());
        assert!(!session.mark_disconnected());
        assert!(!session.advance(SessionState::Connected));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_reply_subjects_are_unique() {
        let a = Session::new(1, &prefix()).unwrap();
        let b = Session::new(1, &prefix()).unwrap();
        assert_ne!(a.reply_subject(), b.reply_subject());
        assert!(a.reply_subject().as_str().starts_with("VCIRCUIT.REPLY."));
        assert!(!a.reply_subject().is_inbox());
    }

    #[test]
    fn test_counters() {
        let session = Session::new(2, &prefix()).unwrap();
        assert_eq!(session.record_sent(), 1);
        assert!(!session.all_sent());
        assert_eq!(session.record_sent(), 2);
        assert!(session.all_sent());

        assert_eq!(session.record_received(), Some(1));
        assert_eq!(session.record_received(), Some(2));
        assert_eq!(session.record_received(), None);
        assert_eq!(session.received(), 2);
        assert!(session.all_received());
        assert_eq!(session.tally(), Tally { sent: 2, received: 2 });
    }

    #[test]
    fn test_concurrent_receipts_are_unique() {
        let session = Arc::new(Session::new(10_000, &prefix()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(n) = session.record_received() {
                        mine.push(n);
                    }
                    mine
                })
            })
            .collect();

        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=10_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_status_points() {
        assert!(!is_status_point(10, 0));
        assert!(!is_status_point(0, 5));
        assert!(is_status_point(10, 5));
        assert!(!is_status_point(11, 5));
    }
}
