//! Request generator.
//!
//! Burst mode sends every request back to back on the calling thread.
//! Paced mode sends one request per timer tick on a queue and cancels its
//! own timer once the last request is out.
//!
//! Any send failure is fatal in both modes. The one exception is a send
//! refused because the circuit is already disconnected: that run is ended by
//! the session monitor instead.

use crate::completion::{Completion, Outcome};
use crate::error::{BenchError, Result};
use crate::session::{is_status_point, Session};
use crate::status::{Progress, SharedStatus};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use vcircuit_core::event::{Timer, TimerHandle};
use vcircuit_core::message::Message;
use vcircuit_core::queue::Queue;
use vcircuit_core::subject::Subject;
use vcircuit_core::transport::Transport;

/// What one send attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Request number `n` went out.
    Sent(u32),
    /// Nothing left to send, or the circuit is gone.
    Done,
}

/// Sends the session's requests on a circuit transport.
pub struct RequestGenerator {
    session: Arc<Session>,
    transport: Transport,
    request_subject: Subject,
    status_frequency: u32,
    status: SharedStatus,
}

impl RequestGenerator {
    pub fn new(
        session: Arc<Session>,
        transport: Transport,
        request_subject: Subject,
        status_frequency: u32,
        status: SharedStatus,
    ) -> Self {
        Self {
            session,
            transport,
            request_subject,
            status_frequency,
            status,
        }
    }

    /// Build one request carrying two random addends.
    fn request(&self) -> Message {
        let mut rng = rand::thread_rng();
        Message::to(self.request_subject.clone())
            .with_reply_subject(self.session.reply_subject().clone())
            .with_u32("x", rng.gen())
            .with_u32("y", rng.gen())
    }

    fn step(&self) -> Result<Step> {
        if self.session.all_sent() || self.session.is_disconnected() {
            return Ok(Step::Done);
        }

        let request = self.session.sent() + 1;
        match self.transport.send(self.request()) {
            Ok(()) => {}
            // The circuit already recorded the disconnect and its advisory is
            // on the way to the monitor, which ends the run.
            Err(e) if e.is_disconnected() || self.session.is_disconnected() => {
                debug!(request, error = %e, "[GENERATOR] Circuit gone, stopping");
                return Ok(Step::Done);
            }
            Err(e) => {
                return Err(BenchError::SendFailure {
                    request,
                    reason: e.to_string(),
                })
            }
        }

        let sent = self.session.record_sent();
        if is_status_point(sent, self.status_frequency) {
            self.status.report(Progress::Sent {
                sent,
                received: self.session.received(),
            });
        }
        Ok(Step::Sent(sent))
    }

    fn report_done(&self) {
        self.status.report(Progress::SendingDone {
            sent: self.session.sent(),
            received: self.session.received(),
        });
    }

    /// Send every request on the calling thread.
    ///
    /// # Errors
    ///
    /// `SendFailure` on the first request that cannot be sent.
    pub fn run_burst(&self) -> Result<u32> {
        while let Step::Sent(n) = self.step()? {
            trace!(n, "[GENERATOR] Sent");
        }
        self.report_done();
        Ok(self.session.sent())
    }

    /// Send one request every `interval` from a timer on `queue`.
    ///
    /// A send failure ends the run through `completion`. The returned timer
    /// must be kept alive until the run is over.
    pub fn start_paced(self, queue: &Queue, interval: Duration, completion: Arc<Completion>) -> Result<Timer> {
        let timer = Timer::new(queue, interval, move |handle: &TimerHandle| match self.step() {
            Ok(Step::Sent(n)) => {
                if self.session.all_sent() {
                    trace!(n, "[GENERATOR] Last request sent");
                    self.report_done();
                    handle.cancel();
                }
            }
            Ok(Step::Done) => handle.cancel(),
            Err(e) => {
                warn!(error = %e, "[GENERATOR] Send failed");
                handle.cancel();
                if let BenchError::SendFailure { request, reason } = e {
                    completion.signal(Outcome::SendFailed { request, reason });
                }
            }
        })?;
        debug!(?interval, queue = %queue.name(), "[GENERATOR] Paced sending started");
        Ok(timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{NullStatus, StatusSink};
    use parking_lot::Mutex;
    use vcircuit_core::bus::LocalBus;
    use vcircuit_core::queue::Dispatcher;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Progress>>);

    impl StatusSink for Collect {
        fn report(&self, progress: Progress) {
            self.0.lock().push(progress);
        }
    }

    fn setup(name: &str, requests: u32) -> (Arc<Session>, Transport, flume::Receiver<Message>) {
        let transport = Transport::new(Arc::new(LocalBus::new(name)));
        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(requests, &prefix).unwrap());

        let (tx, rx) = flume::unbounded();
        transport
            .subscribe(
                Subject::literal("WORK").unwrap(),
                Arc::new(move |m: &Message| {
                    let _ = tx.send(m.clone());
                }),
            )
            .unwrap();
        (session, transport, rx)
    }

    #[test]
    fn test_burst_sends_exactly_requested() {
        let (session, transport, rx) = setup("gen-burst", 25);
        let status = Arc::new(Collect::default());
        let generator = RequestGenerator::new(
            session.clone(),
            transport,
            Subject::literal("WORK").unwrap(),
            10,
            status.clone(),
        );

        assert_eq!(generator.run_burst().unwrap(), 25);
        assert_eq!(session.sent(), 25);

        let requests: Vec<Message> = rx.try_iter().collect();
        assert_eq!(requests.len(), 25);
        for req in &requests {
            assert_eq!(req.reply_subject(), Some(session.reply_subject()));
            assert!(req.get_u32("x").is_ok());
            assert!(req.get_u32("y").is_ok());
        }

        let reports = status.0.lock().clone();
        assert_eq!(
            reports,
            vec![
                Progress::Sent { sent: 10, received: 0 },
                Progress::Sent { sent: 20, received: 0 },
                Progress::SendingDone { sent: 25, received: 0 },
            ]
        );
    }

    #[test]
    fn test_disconnected_session_sends_nothing() {
        let (session, transport, rx) = setup("gen-disconnected", 10);
        session.mark_disconnected();
        let generator = RequestGenerator::new(
            session.clone(),
            transport,
            Subject::literal("WORK").unwrap(),
            0,
            Arc::new(NullStatus),
        );

        assert_eq!(generator.run_burst().unwrap(), 0);
        assert!(rx.is_empty());
    }

    fn generator(session: &Arc<Session>, transport: Transport) -> RequestGenerator {
        RequestGenerator::new(
            session.clone(),
            transport,
            Subject::literal("WORK").unwrap(),
            0,
            Arc::new(NullStatus),
        )
    }

    #[test]
    fn test_send_failure_is_fatal() {
        let bus = Arc::new(LocalBus::new("gen-fail"));
        bus.shutdown();
        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(5, &prefix).unwrap());

        let err = generator(&session, Transport::new(bus)).run_burst().unwrap_err();
        assert!(matches!(err, BenchError::SendFailure { request: 1, .. }));
        assert_eq!(session.sent(), 0);

        // A malformed request is just as fatal.
        let generator = RequestGenerator::new(
            session,
            Transport::new(Arc::new(LocalBus::new("gen-fail-2"))),
            Subject::parse("WORK.>").unwrap(),
            0,
            Arc::new(NullStatus),
        );
        let err = generator.run_burst().unwrap_err();
        assert!(matches!(err, BenchError::SendFailure { request: 1, .. }));
    }

    #[test]
    fn test_burst_aborts_at_first_failed_send() {
        let bus = Arc::new(LocalBus::new("gen-fail-mid"));
        let transport = Transport::new(bus.clone());
        let (tx, rx) = flume::unbounded();
        transport
            .subscribe(
                Subject::literal("WORK").unwrap(),
                Arc::new(move |m: &Message| {
                    let _ = tx.send(m.clone());
                }),
            )
            .unwrap();
        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(10, &prefix).unwrap());
        let generator = generator(&session, transport);

        for n in 1..=3 {
            assert_eq!(generator.step().unwrap(), Step::Sent(n));
        }
        bus.shutdown();

        let err = generator.run_burst().unwrap_err();
        assert!(matches!(err, BenchError::SendFailure { request: 4, .. }));
        assert_eq!(session.sent(), 3);
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn test_disconnected_circuit_stops_quietly() {
        let transport = Transport::new(Arc::new(LocalBus::new("gen-vc")));
        let options = vcircuit_core::options::CircuitOptions::new();
        let acceptor = vcircuit_core::circuit::VirtualCircuit::accept(&transport, options.clone()).unwrap();
        let connector =
            vcircuit_core::circuit::VirtualCircuit::connect(&transport, acceptor.connect_subject(), options)
                .unwrap();
        connector.wait_for_connection(Duration::from_secs(1)).unwrap();
        acceptor.close();

        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(5, &prefix).unwrap());
        assert_eq!(generator(&session, connector.transport()).run_burst().unwrap(), 0);
    }

    #[test]
    fn test_paced_send_failure_ends_run() {
        let bus = Arc::new(LocalBus::new("gen-paced-fail"));
        bus.shutdown();
        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(5, &prefix).unwrap());

        let queue = Queue::new("gen-paced-fail");
        let _dispatcher = Dispatcher::spawn(&queue).unwrap();
        let completion = Arc::new(Completion::new(session.clone()));
        let timer = generator(&session, Transport::new(bus))
            .start_paced(&queue, Duration::from_millis(2), completion.clone())
            .unwrap();

        let ending = completion.wait(Some(Duration::from_secs(2)));
        assert!(matches!(ending.outcome, Outcome::SendFailed { request: 1, .. }));
        assert_eq!(ending.tally.sent, 0);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while timer.is_active() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!timer.is_active());
    }

    #[test]
    fn test_paced_cancels_itself() {
        let (session, transport, rx) = setup("gen-paced", 5);
        let status = Arc::new(Collect::default());
        let generator = RequestGenerator::new(
            session.clone(),
            transport,
            Subject::literal("WORK").unwrap(),
            0,
            status.clone(),
        );

        let queue = Queue::new("gen-paced");
        let _dispatcher = Dispatcher::spawn(&queue).unwrap();
        let completion = Arc::new(Completion::new(session.clone()));
        let timer = generator
            .start_paced(&queue, Duration::from_millis(2), completion.clone())
            .unwrap();

        for _ in 0..5 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while timer.is_active() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!timer.is_active());
        assert_eq!(session.sent(), 5);
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert!(!completion.is_signalled());
        assert_eq!(
            status.0.lock().last(),
            Some(&Progress::SendingDone { sent: 5, received: 0 })
        );
    }
}
