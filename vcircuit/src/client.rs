//! The benchmark client.
//!
//! ```text
//! locate ─► establish ─► ┬─ generator (main thread, or timer on responses)
//!                        ├─ collector (responses dispatcher)
//!                        └─ monitor   (wait dispatcher)
//!                               │
//!          main thread waits on the completion latch ─► report ─► teardown
//! ```

use crate::collector::start_collector;
use crate::completion::{Completion, Ending, Outcome};
use crate::config::ClientConfig;
use crate::discovery::locate_server;
use crate::error::Result;
use crate::establish::establish;
use crate::generator::RequestGenerator;
use crate::monitor::start_monitor;
use crate::session::{Session, SessionState};
use crate::stats::{RunReport, Stopwatch};
use crate::status::{Progress, SharedStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vcircuit_core::event::Listener;
use vcircuit_core::queue::{Dispatcher, Queue};
use vcircuit_core::subject::Subject;
use vcircuit_core::transport::Transport;

/// Run one benchmark against whichever server answers first.
///
/// Returns the run report for complete and partial runs alike; only setup
/// failures and burst-mode send failures are errors.
///
/// # Errors
///
/// - `DiscoveryTimeout`, `ConnectTimeout` during setup
/// - `SendFailure` if a burst-mode send fails
/// - `Transport` for substrate failures during setup
pub fn run_client(config: &ClientConfig, transport: &Transport, status: SharedStatus) -> Result<RunReport> {
    let response_prefix = Subject::literal(&config.response_subject)?;
    let session = Arc::new(Session::new(config.requests, &response_prefix)?);

    if config.requests == 0 {
        info!("No requests configured, nothing to do");
        let ending = Ending {
            outcome: Outcome::Completed,
            tally: session.tally(),
        };
        return Ok(RunReport::from_ending(&session, Duration::ZERO, ending));
    }

    let discovery_subject = Subject::literal(&config.discovery_subject)?;
    let request_subject = Subject::literal(&config.request_subject)?;

    status.report(Progress::Searching {
        subject: discovery_subject.to_string(),
    });
    let connect_subject = locate_server(transport, &discovery_subject, config.discovery_timeout)?;
    status.report(Progress::Located {
        connect_subject: connect_subject.to_string(),
    });

    session.advance(SessionState::Waiting);
    let circuit = establish(
        transport,
        &connect_subject,
        config.connect_timeout,
        config.circuit.clone(),
    )?;
    session.advance(SessionState::Connected);
    let vc = circuit.transport().with_description(&config.transport.description);

    let completion = Arc::new(Completion::new(session.clone()));
    let responses = Queue::new("responses");
    let wait = Queue::new("wait");

    let run = Run {
        collector: start_collector(
            &responses,
            &vc,
            session.clone(),
            config.status_frequency,
            status.clone(),
            completion.clone(),
        )?,
        monitor: start_monitor(&wait, &vc, session.clone(), status.clone(), completion.clone())?,
        response_dispatcher: Some(Dispatcher::spawn(&responses)?),
        wait_dispatcher: Some(Dispatcher::spawn(&wait)?),
        queues: [responses.clone(), wait],
    };

    let generator = RequestGenerator::new(
        session.clone(),
        vc,
        request_subject,
        config.status_frequency,
        status.clone(),
    );

    status.report(Progress::Starting);
    let mut stopwatch = Stopwatch::new();
    let started = stopwatch.start();

    let timer = if config.is_paced() {
        Some(generator.start_paced(&responses, config.interval, completion.clone())?)
    } else {
        generator.run_burst()?;
        None
    };

    // The run timeout covers sending too, so it counts from the first request.
    let ending = completion.wait_from(started, config.run_timeout);
    stopwatch.stop();

    // Listeners go before the circuit so closing it does not look like a
    // lost session.
    drop(timer);
    drop(run);
    drop(circuit);

    let report = RunReport::from_ending(&session, stopwatch.elapsed(), ending);
    debug!(outcome = %report.outcome, sent = report.sent, received = report.received, "[CLIENT] Run finished");
    Ok(report)
}

/// Listeners and dispatchers that live for the duration of one run.
struct Run {
    collector: Listener,
    monitor: Listener,
    response_dispatcher: Option<Dispatcher>,
    wait_dispatcher: Option<Dispatcher>,
    queues: [Queue; 2],
}

impl Drop for Run {
    fn drop(&mut self) {
        self.monitor.destroy();
        self.collector.destroy();
        for queue in &self.queues {
            queue.destroy();
        }
        if let Some(dispatcher) = self.response_dispatcher.take() {
            dispatcher.stop();
        }
        if let Some(dispatcher) = self.wait_dispatcher.take() {
            dispatcher.stop();
        }
    }
}
