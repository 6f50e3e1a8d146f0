//! The benchmark server.
//!
//! Every locate request gets its own acceptor circuit; the reply hands the
//! client that circuit's connect subject. Requests arriving on a circuit are
//! answered on the same circuit with `sum = x + y`. All callbacks run on one
//! queue, dispatched by [`Server::run`] until the server has been idle for
//! the configured timeout.

use crate::config::ServerConfig;
use crate::error::{BenchError, Result};
use crate::session::is_status_point;
use crate::status::{Progress, SharedStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use vcircuit_core::advisory::{disconnected_pattern, CircuitEvent};
use vcircuit_core::circuit::VirtualCircuit;
use vcircuit_core::event::Listener;
use vcircuit_core::message::Message;
use vcircuit_core::queue::Queue;
use vcircuit_core::subject::Subject;
use vcircuit_core::transport::Transport;

/// A circuit being served, with the listeners bound to it.
struct Served {
    // Listeners first: they must detach before the circuit closes.
    _work: Listener,
    _monitor: Listener,
    circuit: VirtualCircuit,
}

type Circuits = Arc<Mutex<HashMap<Subject, Served>>>;

/// State shared with the queue callbacks.
struct Shared {
    config: ServerConfig,
    transport: Transport,
    queue: Queue,
    request_subject: Subject,
    circuits: Circuits,
    processed: AtomicU32,
    status: SharedStatus,
}

/// Benchmark server bound to one transport.
pub struct Server {
    shared: Arc<Shared>,
    search: Listener,
}

impl Server {
    /// Start listening for locate requests. Nothing is processed until
    /// [`run`](Self::run) dispatches the queue.
    pub fn start(config: ServerConfig, transport: &Transport, status: SharedStatus) -> Result<Self> {
        let discovery_subject = Subject::literal(&config.discovery_subject)?;
        let request_subject = Subject::literal(&config.request_subject)?;
        let queue = Queue::new("server");

        let shared = Arc::new(Shared {
            config,
            transport: transport.clone(),
            queue: queue.clone(),
            request_subject,
            circuits: Arc::new(Mutex::new(HashMap::new())),
            processed: AtomicU32::new(0),
            status,
        });

        let weak = Arc::downgrade(&shared);
        let search = Listener::new(&queue, transport, discovery_subject.clone(), move |req: &Message| {
            if let Some(shared) = weak.upgrade() {
                shared.on_search(req);
            }
        })?;

        info!(subject = %discovery_subject, "Listening for client searches");
        Ok(Self { shared, search })
    }

    /// Dispatch until idle for the configured timeout, or until
    /// [`shutdown`](Self::shutdown). Returns the number of processed
    /// requests.
    ///
    /// # Errors
    ///
    /// `IdleTimeout` when no traffic arrived for the idle period. The total
    /// is reported before returning.
    pub fn run(&self) -> Result<u32> {
        let idle = self.shared.config.idle_timeout;
        loop {
            match self.shared.queue.timed_dispatch(idle) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    warn!(?idle, "Server idle, stopping");
                    self.report_total();
                    return Err(BenchError::IdleTimeout(idle));
                }
                Err(_) => {
                    debug!("[SERVER] Queue closed");
                    self.report_total();
                    return Ok(self.processed());
                }
            }
        }
    }

    /// Stop [`run`](Self::run) and drop every served circuit.
    pub fn shutdown(&self) {
        self.search.destroy();
        self.shared.queue.destroy();
        let circuits: Vec<Served> = self.shared.circuits.lock().drain().map(|(_, s)| s).collect();
        drop(circuits);
    }

    /// Requests answered so far.
    #[must_use]
    pub fn processed(&self) -> u32 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Circuits currently being served.
    #[must_use]
    pub fn circuit_count(&self) -> usize {
        self.shared.circuits.lock().len()
    }

    fn report_total(&self) {
        self.shared.status.report(Progress::Processed {
            total: self.processed(),
        });
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn on_search(self: &Arc<Self>, req: &Message) {
        let circuit = match VirtualCircuit::accept(&self.transport, self.config.circuit.clone()) {
            Ok(circuit) => circuit,
            Err(e) => {
                warn!(error = %e, "Failed to create a virtual circuit");
                return;
            }
        };
        let connect_subject = circuit.connect_subject().clone();
        self.status.report(Progress::SearchReceived {
            connect_subject: connect_subject.to_string(),
        });

        let served = match self.serve(&circuit) {
            Ok((work, monitor)) => Served {
                _work: work,
                _monitor: monitor,
                circuit,
            },
            Err(e) => {
                warn!(error = %e, "Failed to listen on a virtual circuit");
                return;
            }
        };
        self.circuits.lock().insert(connect_subject.clone(), served);

        let reply = Message::new().with_reply_subject(connect_subject.clone());
        if let Err(e) = self.transport.send_reply(reply, req) {
            warn!(error = %e, "Failed to answer a client search");
            self.reap(&connect_subject);
        }
    }

    /// Bind the work and disconnect listeners for one circuit.
    fn serve(self: &Arc<Self>, circuit: &VirtualCircuit) -> vcircuit_core::error::Result<(Listener, Listener)> {
        let vc = circuit.transport();

        let shared = Arc::downgrade(self);
        let replier = vc.clone();
        let work = Listener::new(&self.queue, &vc, self.request_subject.clone(), move |req: &Message| {
            if let Some(shared) = shared.upgrade() {
                shared.on_request(&replier, req);
            }
        })?;

        let shared = Arc::downgrade(self);
        let key = circuit.connect_subject().clone();
        let monitor = Listener::new(&self.queue, &vc, disconnected_pattern(), move |advisory: &Message| {
            if let Some(shared) = shared.upgrade() {
                if let Some(CircuitEvent::Disconnected { reason }) = CircuitEvent::from_message(advisory) {
                    info!(circuit = %key, %reason, "Virtual circuit disconnected");
                    shared.reap(&key);
                }
            }
        })?;

        Ok((work, monitor))
    }

    fn on_request(&self, vc: &Transport, req: &Message) {
        let (x, y) = match (req.get_u32("x"), req.get_u32("y")) {
            (Ok(x), Ok(y)) => (x, y),
            _ => {
                debug!(request = %req, "[SERVER] Request without x/y, ignored");
                return;
            }
        };

        let mut reply = req.clone();
        reply.clear_reply_subject();
        reply.update_u32("sum", x.wrapping_add(y));
        if let Err(e) = vc.send_reply(reply, req) {
            trace!(error = %e, "[SERVER] Reply not sent");
            return;
        }

        let total = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        if is_status_point(total, self.config.status_frequency) {
            self.status.report(Progress::Processed { total });
        }
    }

    fn reap(&self, key: &Subject) {
        let removed = self.circuits.lock().remove(key);
        if let Some(served) = removed {
            debug!(circuit = %key, state = %served.circuit.state(), "[SERVER] Circuit reaped");
        }
    }
}
