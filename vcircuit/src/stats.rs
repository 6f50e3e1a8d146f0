//! Run statistics.

use crate::completion::{Ending, Outcome};
use crate::error::BenchError;
use crate::session::{Session, SessionState};
use std::fmt;
use std::time::{Duration, Instant};

/// Start/stop timestamps of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stopwatch {
    start: Option<Instant>,
    stop: Option<Instant>,
}

impl Stopwatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start: None,
            stop: None,
        }
    }

    /// Start timing. Returns the start instant.
    pub fn start(&mut self) -> Instant {
        let now = Instant::now();
        self.start = Some(now);
        now
    }

    pub fn stop(&mut self) {
        if self.start.is_some() {
            self.stop = Some(Instant::now());
        }
    }

    /// Time between start and stop. Zero if the watch never ran.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

/// Final summary of a client run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub requested: u32,
    pub sent: u32,
    pub received: u32,
    pub elapsed: Duration,
    pub state: SessionState,
    pub outcome: Outcome,
}

impl RunReport {
    /// Build the report for a run that ended with `ending`. The counters
    /// come from the ending, not from the live session.
    #[must_use]
    pub fn from_ending(session: &Session, elapsed: Duration, ending: Ending) -> Self {
        Self {
            requested: session.requested(),
            sent: ending.tally.sent,
            received: ending.tally.received,
            elapsed,
            state: session.state(),
            outcome: ending.outcome,
        }
    }

    /// Whether the run completed with every expected response in.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, Outcome::Completed) && self.received >= self.requested
    }

    /// Requests per second, for complete runs that measured any time.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (self.is_complete() && self.requested > 0 && secs > 0.0).then(|| f64::from(self.requested) / secs)
    }

    /// Process exit code: 0 only for a complete run.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_complete() {
            0
        } else {
            1
        }
    }

    /// The error a partial run ended with, if it was one.
    #[must_use]
    pub fn failure(&self) -> Option<BenchError> {
        if self.is_complete() {
            return None;
        }
        match &self.outcome {
            Outcome::Disconnected { reason } => Some(BenchError::SessionDisconnected {
                reason: reason.clone(),
                sent: self.sent,
                received: self.received,
            }),
            Outcome::SendFailed { request, reason } => Some(BenchError::SendFailure {
                request: *request,
                reason: reason.clone(),
            }),
            Outcome::Completed | Outcome::TimedOut(_) => None,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            writeln!(f, "Received all {} server replies", self.received)?;
            write!(
                f,
                "{} requests took {:.2} secs to process.",
                self.requested,
                self.elapsed.as_secs_f64()
            )?;
            if let Some(rate) = self.rate() {
                write!(
                    f,
                    "\nThis result implies an effective rate of {rate:.1} requests/second."
                )?;
            }
            return Ok(());
        }

        write!(
            f,
            "Received {} responses to {} requests.",
            self.received, self.sent
        )?;
        match &self.outcome {
            Outcome::Disconnected { reason } => {
                write!(f, "\nVirtual circuit {} ({reason}).", self.state)
            }
            Outcome::TimedOut(after) => write!(f, "\nRun timed out after {:.2} secs.", after.as_secs_f64()),
            Outcome::SendFailed { request, reason } => {
                write!(f, "\nRequest {request} could not be sent: {reason}.")
            }
            Outcome::Completed => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(requested: u32, sent: u32, received: u32, outcome: Outcome) -> RunReport {
        RunReport {
            requested,
            sent,
            received,
            elapsed: Duration::from_secs(2),
            state: SessionState::Connected,
            outcome,
        }
    }

    #[test]
    fn test_complete_run() {
        let r = report(100, 100, 100, Outcome::Completed);
        assert!(r.is_complete());
        assert_eq!(r.exit_code(), 0);
        assert_eq!(r.rate(), Some(50.0));
        assert!(r.failure().is_none());

        let text = r.to_string();
        assert!(text.contains("Received all 100 server replies"));
        assert!(text.contains("100 requests took 2.00 secs to process."));
        assert!(text.contains("effective rate of 50.0 requests/second"));
    }

    #[test]
    fn test_partial_run_has_no_rate() {
        let r = report(100, 100, 40, Outcome::TimedOut(Duration::from_secs(1)));
        assert!(!r.is_complete());
        assert_eq!(r.exit_code(), 1);
        assert_eq!(r.rate(), None);
        assert!(r.failure().is_none());
        assert!(r.to_string().starts_with("Received 40 responses to 100 requests."));
    }

    #[test]
    fn test_disconnected_run() {
        let mut r = report(100, 60, 40, Outcome::Disconnected {
            reason: "closed by peer".into(),
        });
        r.state = SessionState::Disconnected;
        assert!(matches!(
            r.failure(),
            Some(BenchError::SessionDisconnected { sent: 60, received: 40, .. })
        ));
        assert!(r.to_string().contains("Virtual circuit disconnected (closed by peer)."));
    }

    #[test]
    fn test_outcome_decides_completeness() {
        // Every reply counted, but the run timed out before the collector
        // could signal.
        let r = report(10, 10, 10, Outcome::TimedOut(Duration::from_secs(1)));
        assert!(!r.is_complete());
        assert_eq!(r.exit_code(), 1);
        assert!(r.to_string().contains("Run timed out"));
    }

    #[test]
    fn test_report_uses_frozen_counters() {
        use crate::completion::Ending;
        use crate::session::Tally;
        use vcircuit_core::subject::Subject;

        let session = Session::new(5, &Subject::literal("VCIRCUIT.REPLY").unwrap()).unwrap();
        for _ in 0..5 {
            session.record_sent();
            session.record_received();
        }
        let ending = Ending {
            outcome: Outcome::TimedOut(Duration::from_secs(1)),
            tally: Tally { sent: 5, received: 3 },
        };
        let r = RunReport::from_ending(&session, Duration::from_secs(1), ending);
        assert_eq!((r.sent, r.received), (5, 3));
        assert!(!r.is_complete());
    }

    #[test]
    fn test_empty_run() {
        let mut r = report(0, 0, 0, Outcome::Completed);
        r.elapsed = Duration::ZERO;
        assert!(r.is_complete());
        assert_eq!(r.rate(), None);
        assert!(!r.to_string().contains("effective rate"));
    }

    #[test]
    fn test_stopwatch() {
        let mut watch = Stopwatch::new();
        assert_eq!(watch.elapsed(), Duration::ZERO);
        watch.stop();
        assert_eq!(watch.elapsed(), Duration::ZERO);

        watch.start();
        std::thread::sleep(Duration::from_millis(5));
        watch.stop();
        let elapsed = watch.elapsed();
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(watch.elapsed(), elapsed);
    }
}
