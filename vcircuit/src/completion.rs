//! Completion latch: wakes the main thread once the run is over.
//!
//! The collector (all responses in), the monitor (circuit lost) and a failed
//! paced send race to end the run. The first [`signal`](Completion::signal)
//! wins and freezes the session counters as they stood at that moment;
//! later calls are no-ops, so the main thread wakes exactly once and
//! reports exactly once.

use crate::session::{Session, Tally};
use flume::{Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every expected response arrived.
    Completed,
    /// The circuit was lost first.
    Disconnected { reason: String },
    /// A paced send failed.
    SendFailed { request: u32, reason: String },
    /// The run timeout elapsed first.
    TimedOut(Duration),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Disconnected { reason } => write!(f, "disconnected ({reason})"),
            Self::SendFailed { request, reason } => write!(f, "request {request} failed ({reason})"),
            Self::TimedOut(after) => write!(f, "timed out after {after:?}"),
        }
    }
}

/// The outcome of a run and the counters at the moment it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ending {
    pub outcome: Outcome,
    pub tally: Tally,
}

/// One-shot, first-writer-wins latch over one session.
pub struct Completion {
    session: Arc<Session>,
    fired: AtomicBool,
    /// Set once a waiter has taken the ending.
    taken: AtomicBool,
    tx: Sender<Ending>,
    rx: Receiver<Ending>,
}

impl Completion {
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            session,
            fired: AtomicBool::new(false),
            taken: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// End the run with `outcome`.
    ///
    /// Returns the counters the run ended with, or `None` if it had already
    /// ended.
    pub fn signal(&self, outcome: Outcome) -> Option<Tally> {
        self.signal_then(outcome, |_| {})
    }

    /// Like [`signal`](Self::signal), running `on_win` if this call ends the
    /// run. The waiter wakes only after `on_win` returns.
    pub fn signal_then(&self, outcome: Outcome, on_win: impl FnOnce(Tally)) -> Option<Tally> {
        // Snapshot first: whatever the winner saw is what gets reported.
        let tally = self.session.tally();
        if self.fired.swap(true, Ordering::AcqRel) {
            trace!(%outcome, "[COMPLETION] Already signalled, ignoring");
            return None;
        }
        debug!(%outcome, sent = tally.sent, received = tally.received, "[COMPLETION] Signalled");
        on_win(tally);
        let _ = self.tx.try_send(Ending { outcome, tally });
        Some(tally)
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Block until signalled, or until `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> Ending {
        self.wait_from(Instant::now(), timeout)
    }

    /// Block until signalled, or until `timeout` has elapsed since `start`.
    ///
    /// A timeout closes the latch too: signals arriving afterwards are
    /// ignored, and the counters are frozen as of the timeout.
    pub fn wait_from(&self, start: Instant, timeout: Option<Duration>) -> Ending {
        let deadline = timeout.and_then(|t| start.checked_add(t));
        let received = match deadline {
            Some(deadline) => self.rx.recv_deadline(deadline).ok(),
            None => self.rx.recv().ok(),
        };
        if let Some(ending) = received {
            self.taken.store(true, Ordering::Release);
            return ending;
        }

        let signalled = self.fired.swap(true, Ordering::AcqRel);
        let tally = self.session.tally();
        let first_taker = !self.taken.swap(true, Ordering::AcqRel);
        if signalled && first_taker {
            // A signal won the race and is about to land.
            if let Ok(ending) = self.rx.recv() {
                return ending;
            }
        }
        Ending {
            outcome: Outcome::TimedOut(timeout.unwrap_or_default()),
            tally,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("fired", &self.is_signalled())
            .finish()
    }
}
