//! Session monitor: ends the run when the circuit reports a disconnect.

use crate::completion::{Completion, Outcome};
use crate::session::Session;
use crate::status::{Progress, SharedStatus};
use std::sync::Arc;
use tracing::debug;
use vcircuit_core::advisory::{disconnected_pattern, CircuitEvent};
use vcircuit_core::error::Result;
use vcircuit_core::event::Listener;
use vcircuit_core::message::Message;
use vcircuit_core::queue::Queue;
use vcircuit_core::transport::Transport;

/// Listen for disconnect advisories on the circuit `transport`.
///
/// Runs on `queue`, which should not be the response queue, so a backlog of
/// replies cannot delay noticing the loss.
pub fn start_monitor(
    queue: &Queue,
    transport: &Transport,
    session: Arc<Session>,
    status: SharedStatus,
    completion: Arc<Completion>,
) -> Result<Listener> {
    Listener::new(queue, transport, disconnected_pattern(), move |advisory: &Message| {
        let reason = match CircuitEvent::from_message(advisory) {
            Some(CircuitEvent::Disconnected { reason }) => reason,
            _ => return,
        };
        // A disconnect counts only if it is what ends the run.
        let won = completion.signal_then(
            Outcome::Disconnected {
                reason: reason.clone(),
            },
            |tally| {
                session.mark_disconnected();
                status.report(Progress::Disconnected {
                    reason: reason.clone(),
                    sent: tally.sent,
                    received: tally.received,
                });
            },
        );
        if won.is_none() {
            debug!(%reason, "[MONITOR] Run already over, advisory ignored");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::status::StatusSink;
    use parking_lot::Mutex;
    use std::time::Duration;
    use vcircuit_core::bus::LocalBus;
    use vcircuit_core::queue::Dispatcher;
    use vcircuit_core::subject::Subject;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Progress>>);

    impl StatusSink for Collect {
        fn report(&self, progress: Progress) {
            self.0.lock().push(progress);
        }
    }

    struct Fixture {
        transport: Transport,
        session: Arc<Session>,
        completion: Arc<Completion>,
        status: Arc<Collect>,
        queue: Queue,
        _dispatcher: Dispatcher,
        _listener: Listener,
    }

    fn fixture(name: &str, requested: u32) -> Fixture {
        let transport = Transport::new(Arc::new(LocalBus::new(name)));
        let prefix = Subject::literal("VCIRCUIT.REPLY").unwrap();
        let session = Arc::new(Session::new(requested, &prefix).unwrap());
        session.advance(SessionState::Connected);

        let queue = Queue::new(name);
        let dispatcher = Dispatcher::spawn(&queue).unwrap();
        let completion = Arc::new(Completion::new(session.clone()));
        let status = Arc::new(Collect::default());
        let listener = start_monitor(
            &queue,
            &transport,
            session.clone(),
            status.clone(),
            completion.clone(),
        )
        .unwrap();

        Fixture {
            transport,
            session,
            completion,
            status,
            queue,
            _dispatcher: dispatcher,
            _listener: listener,
        }
    }

    /// Wait until everything pushed so far has been dispatched.
    fn drain(queue: &Queue) {
        let (tx, rx) = flume::bounded(1);
        queue.push(move || {
            let _ = tx.send(());
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_disconnect_advisory_ends_run_once() {
        let f = fixture("monitor", 10);
        f.session.record_sent();

        let advisory = CircuitEvent::Disconnected {
            reason: "peer timeout".into(),
        };
        f.transport.send(advisory.to_message()).unwrap();
        f.transport.send(advisory.to_message()).unwrap();

        assert_eq!(
            f.completion.wait(Some(Duration::from_secs(1))).outcome,
            Outcome::Disconnected {
                reason: "peer timeout".into()
            }
        );
        drain(&f.queue);
        assert_eq!(f.session.state(), SessionState::Disconnected);
        assert_eq!(
            f.status.0.lock().clone(),
            vec![Progress::Disconnected {
                reason: "peer timeout".into(),
                sent: 1,
                received: 0,
            }]
        );
    }

    #[test]
    fn test_disconnect_after_completion_is_ignored() {
        let f = fixture("monitor-late", 2);
        for _ in 0..2 {
            f.session.record_sent();
            f.session.record_received();
        }
        assert!(f.completion.signal(Outcome::Completed).is_some());
        assert_eq!(f.completion.wait(None).outcome, Outcome::Completed);

        let advisory = CircuitEvent::Disconnected {
            reason: "closed by peer".into(),
        };
        f.transport.send(advisory.to_message()).unwrap();
        drain(&f.queue);

        assert_eq!(f.session.state(), SessionState::Connected);
        assert!(f.status.0.lock().is_empty());
    }
}
