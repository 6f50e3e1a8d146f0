//! Virtual circuits: dedicated point-to-point sessions layered on a bus.
//!
//! An acceptor listens on a fresh inbox (its *connect subject*) and binds to
//! the first connector that reaches it. A connector sends a connect request
//! to that subject and waits for the acceptance. From then on each side
//! talks only to the peer's inbox:
//!
//! ```text
//! connector                          acceptor
//!     | -- CONNECT (reply: inbox A) --> |   connect subject = inbox B
//!     | <-- ACCEPT (reply: inbox B) --- |
//!     | -- DATA {data={...}} ---------> |   delivered by inner subject
//!     | <-> HEARTBEAT every interval <-> |
//!     | -- CLOSE ---------------------> |
//! ```
//!
//! Messages sent on [`VirtualCircuit::transport`] are wrapped in a DATA
//! envelope; the receiving side unwraps them and delivers to listeners on
//! its own circuit transport, matching the inner send subject. Lifecycle
//! changes are delivered the same way as advisories (see
//! [`advisory`](crate::advisory)).

use crate::advisory::CircuitEvent;
use crate::bus::{send_subject_of, Bus, DeliverySink, InboxGenerator, SinkTable, SubscriptionId};
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::options::CircuitOptions;
use crate::subject::Subject;
use crate::transport::Transport;
use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const CONTROL_FIELD: &str = "_vc";
const DATA_FIELD: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Control {
    Connect = 1,
    Accept = 2,
    Data = 3,
    Heartbeat = 4,
    Close = 5,
}

impl Control {
    const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Connect),
            2 => Some(Self::Accept),
            3 => Some(Self::Data),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::Close),
            _ => None,
        }
    }
}

/// Circuit lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Created, peer not confirmed yet.
    Waiting,
    /// Peer confirmed; data may flow.
    Connected,
    /// Lost or closed. Terminal.
    Disconnected,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Acceptor,
    Connector,
}

struct CircuitInner {
    name: String,
    role: Role,
    transport: Transport,
    local_inbox: Subject,
    /// Acceptor's connect subject (connector only).
    target: Option<Subject>,
    peer: Mutex<Option<Subject>>,
    state: Mutex<CircuitState>,
    state_changed: Condvar,
    last_heard: Mutex<Instant>,
    table: SinkTable,
    inbox: InboxGenerator,
    bus_subscription: Mutex<Option<SubscriptionId>>,
    options: CircuitOptions,
}

impl CircuitInner {
    fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    fn peer(&self) -> Option<Subject> {
        self.peer.lock().clone()
    }

    fn touch(&self) {
        *self.last_heard.lock() = Instant::now();
    }

    fn send_control(&self, kind: Control, to: Subject) -> Result<()> {
        let msg = Message::to(to)
            .with_reply_subject(self.local_inbox.clone())
            .with_u32(CONTROL_FIELD, kind as u32);
        self.transport.send(msg)
    }

    fn emit(&self, event: &CircuitEvent) {
        let msg = event.to_message();
        self.table.deliver(&event.subject(), &msg);
    }

    /// Move to `Disconnected`. Returns false if already there.
    fn mark_disconnected(&self, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if *state == CircuitState::Disconnected {
                return false;
            }
            *state = CircuitState::Disconnected;
            self.state_changed.notify_all();
        }

        info!(circuit = %self.name, reason, "[VC] Disconnected");
        self.emit(&CircuitEvent::Disconnected {
            reason: reason.to_string(),
        });
        true
    }

    fn on_wire(&self, msg: &Message) {
        let Some(kind) = msg.get_u32(CONTROL_FIELD).ok().and_then(Control::from_u32) else {
            trace!(circuit = %self.name, "[VC] Ignoring non-circuit message");
            return;
        };
        let from = msg.reply_subject().cloned();

        match kind {
            Control::Connect => self.on_connect(from),
            Control::Accept => self.on_accept(from),
            Control::Data | Control::Heartbeat | Control::Close => {
                if !self.is_from_peer(from.as_ref()) {
                    trace!(circuit = %self.name, ?kind, "[VC] Ignoring message from non-peer");
                    return;
                }
                self.touch();
                match kind {
                    Control::Data => self.on_data(msg),
                    Control::Close => {
                        self.mark_disconnected("closed by peer");
                    }
                    _ => {}
                }
            }
        }
    }

    fn is_from_peer(&self, from: Option<&Subject>) -> bool {
        if self.state() != CircuitState::Connected {
            return false;
        }
        matches!((from, self.peer.lock().as_ref()), (Some(f), Some(p)) if f == p)
    }

    fn on_connect(&self, from: Option<Subject>) {
        if self.role != Role::Acceptor {
            return;
        }
        let Some(from) = from else {
            debug!(circuit = %self.name, "[VC] Connect request without reply subject");
            return;
        };

        let newly_connected = {
            let mut state = self.state.lock();
            match *state {
                CircuitState::Waiting => {
                    *self.peer.lock() = Some(from.clone());
                    *state = CircuitState::Connected;
                    self.touch();
                    self.state_changed.notify_all();
                    true
                }
                // Repeated connect from our peer: the acceptance was lost.
                CircuitState::Connected if self.peer.lock().as_ref() == Some(&from) => false,
                CircuitState::Connected => {
                    debug!(circuit = %self.name, connector = %from, "[VC] Already bound, ignoring connector");
                    return;
                }
                CircuitState::Disconnected => return,
            }
        };

        if let Err(e) = self.send_control(Control::Accept, from) {
            warn!(circuit = %self.name, error = %e, "[VC] Failed to send acceptance");
            self.mark_disconnected("acceptance failed");
            return;
        }

        if newly_connected {
            info!(circuit = %self.name, "[VC] Accepted connector");
            self.emit(&CircuitEvent::Connected);
        }
    }

    fn on_accept(&self, from: Option<Subject>) {
        if self.role != Role::Connector {
            return;
        }
        let Some(from) = from else {
            return;
        };

        {
            let mut state = self.state.lock();
            if *state != CircuitState::Waiting {
                return;
            }
            *self.peer.lock() = Some(from);
            *state = CircuitState::Connected;
            self.touch();
            self.state_changed.notify_all();
        }

        info!(circuit = %self.name, "[VC] Connected");
        self.emit(&CircuitEvent::Connected);
    }

    fn on_data(&self, envelope: &Message) {
        let Ok(inner) = envelope.get_message(DATA_FIELD) else {
            debug!(circuit = %self.name, "[VC] Data envelope without payload");
            return;
        };
        let Some(subject) = inner.send_subject() else {
            return;
        };
        let hits = self.table.deliver(subject, inner);
        trace!(circuit = %self.name, %subject, hits, "[VC] Delivered");
    }

    /// One heartbeat tick. Returns false once the loop should end.
    fn tick(&self) -> bool {
        match self.state() {
            CircuitState::Waiting => {
                if let Some(target) = &self.target {
                    if let Err(e) = self.send_control(Control::Connect, target.clone()) {
                        debug!(circuit = %self.name, error = %e, "[VC] Connect retry failed");
                    }
                }
                true
            }
            CircuitState::Connected => {
                let silent = self.last_heard.lock().elapsed();
                if silent >= self.options.peer_timeout() {
                    warn!(circuit = %self.name, ?silent, "[VC] Peer silent");
                    self.mark_disconnected("peer timeout");
                    return false;
                }
                if let Some(peer) = self.peer() {
                    if let Err(e) = self.send_control(Control::Heartbeat, peer) {
                        self.mark_disconnected(&format!("heartbeat failed: {e}"));
                        return false;
                    }
                }
                true
            }
            CircuitState::Disconnected => false,
        }
    }

    fn close(&self) {
        if self.state() == CircuitState::Connected {
            if let Some(peer) = self.peer() {
                let _ = self.send_control(Control::Close, peer);
            }
        }
        self.mark_disconnected("closed");

        if let Some(id) = self.bus_subscription.lock().take() {
            self.transport.unsubscribe(id);
        }
    }
}

impl Bus for CircuitInner {
    fn publish(&self, msg: Message) -> Result<()> {
        send_subject_of(&msg)?;

        let peer = {
            let state = self.state.lock();
            match *state {
                CircuitState::Connected => self.peer.lock().clone(),
                CircuitState::Waiting => None,
                CircuitState::Disconnected => {
                    return Err(TransportError::disconnected(format!("circuit {}", self.name)));
                }
            }
        };
        let peer = peer.ok_or_else(|| TransportError::not_connected(format!("circuit {}", self.name)))?;

        let mut envelope = Message::to(peer)
            .with_reply_subject(self.local_inbox.clone())
            .with_u32(CONTROL_FIELD, Control::Data as u32);
        envelope.update_message(DATA_FIELD, msg);
        self.transport.send(envelope)
    }

    fn subscribe(&self, pattern: Subject, sink: DeliverySink) -> Result<SubscriptionId> {
        Ok(self.table.insert(pattern, sink).0)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.table.remove(id);
    }

    fn new_inbox(&self) -> Subject {
        self.inbox.next()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn heartbeat_loop(circuit: Weak<CircuitInner>, stop: Receiver<()>, ivl: Duration) {
    loop {
        match stop.recv_timeout(ivl) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        let Some(inner) = circuit.upgrade() else {
            break;
        };
        if !inner.tick() {
            break;
        }
    }
}

/// A point-to-point session with exactly one peer.
///
/// Dropping the circuit closes it and notifies the peer.
pub struct VirtualCircuit {
    inner: Arc<CircuitInner>,
    stop_tx: Sender<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl VirtualCircuit {
    /// Create an acceptor. Hand [`connect_subject`](Self::connect_subject)
    /// to the prospective peer.
    pub fn accept(transport: &Transport, options: CircuitOptions) -> Result<Self> {
        Self::open(transport, Role::Acceptor, None, options)
    }

    /// Create a connector bound for the acceptor at `connect_subject` and
    /// send the connect request.
    ///
    /// The circuit starts in `Waiting`; use
    /// [`wait_for_connection`](Self::wait_for_connection) to block until the
    /// acceptor confirms. The request is repeated every heartbeat interval
    /// while waiting.
    pub fn connect(
        transport: &Transport,
        connect_subject: &Subject,
        options: CircuitOptions,
    ) -> Result<Self> {
        let circuit = Self::open(
            transport,
            Role::Connector,
            Some(connect_subject.clone()),
            options,
        )?;
        circuit
            .inner
            .send_control(Control::Connect, connect_subject.clone())?;
        Ok(circuit)
    }

    fn open(
        transport: &Transport,
        role: Role,
        target: Option<Subject>,
        options: CircuitOptions,
    ) -> Result<Self> {
        let local_inbox = transport.create_inbox();
        let heartbeat_ivl = options.heartbeat_ivl;

        let inner = Arc::new(CircuitInner {
            name: local_inbox.to_string(),
            role,
            transport: transport.clone(),
            local_inbox: local_inbox.clone(),
            target,
            peer: Mutex::new(None),
            state: Mutex::new(CircuitState::Waiting),
            state_changed: Condvar::new(),
            last_heard: Mutex::new(Instant::now()),
            table: SinkTable::new(),
            inbox: InboxGenerator::new(),
            bus_subscription: Mutex::new(None),
            options,
        });

        let weak = Arc::downgrade(&inner);
        let sink: DeliverySink = Arc::new(move |msg: &Message| {
            if let Some(inner) = weak.upgrade() {
                inner.on_wire(msg);
            }
        });
        let id = transport.subscribe(local_inbox, sink)?;
        *inner.bus_subscription.lock() = Some(id);

        let (stop_tx, stop_rx) = flume::bounded(1);
        let weak = Arc::downgrade(&inner);
        let heartbeat = thread::Builder::new()
            .name("vc-heartbeat".to_string())
            .spawn(move || heartbeat_loop(weak, stop_rx, heartbeat_ivl));
        let heartbeat = match heartbeat {
            Ok(handle) => handle,
            Err(e) => {
                inner.close();
                return Err(e.into());
            }
        };

        debug!(circuit = %inner.name, ?role, "[VC] Created");
        Ok(Self {
            inner,
            stop_tx,
            heartbeat: Some(heartbeat),
        })
    }

    /// Block until the peer confirms, the circuit fails, or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// - `Timeout` if still waiting after `timeout`
    /// - `Disconnected` if the circuit was closed while waiting
    pub fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.state_changed.wait_while_for(
            &mut state,
            |s| *s == CircuitState::Waiting,
            timeout,
        );
        match *state {
            CircuitState::Connected => Ok(()),
            CircuitState::Waiting => Err(TransportError::Timeout(timeout)),
            CircuitState::Disconnected => {
                Err(TransportError::disconnected(format!("circuit {}", self.inner.name)))
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == CircuitState::Connected
    }

    /// Subject the peer addresses this side on.
    ///
    /// For an acceptor this is the subject to hand out to connectors.
    #[must_use]
    pub fn connect_subject(&self) -> &Subject {
        &self.inner.local_inbox
    }

    /// The peer's subject, once connected.
    #[must_use]
    pub fn peer(&self) -> Option<Subject> {
        self.inner.peer()
    }

    /// Transport whose sends go only to the peer and whose listeners see
    /// only the peer's traffic and this circuit's advisories.
    #[must_use]
    pub fn transport(&self) -> Transport {
        let bus: Arc<dyn Bus> = self.inner.clone();
        Transport::new(bus).with_description(&format!("vc:{}", self.inner.name))
    }

    /// Close the circuit and notify the peer. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for VirtualCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCircuit")
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for VirtualCircuit {
    fn drop(&mut self) {
        self.inner.close();
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory;
    use crate::bus::LocalBus;

    fn fast() -> CircuitOptions {
        CircuitOptions::new()
            .with_heartbeat_ivl(Duration::from_millis(10))
            .with_missed_heartbeats(3)
    }

    fn pair(transport: &Transport) -> (VirtualCircuit, VirtualCircuit) {
        let acceptor = VirtualCircuit::accept(transport, fast()).unwrap();
        let connector =
            VirtualCircuit::connect(transport, acceptor.connect_subject(), fast()).unwrap();
        connector
            .wait_for_connection(Duration::from_secs(1))
            .unwrap();
        acceptor.wait_for_connection(Duration::from_secs(1)).unwrap();
        (acceptor, connector)
    }

    fn collect(transport: &Transport, pattern: &str) -> Receiver<Message> {
        let (tx, rx) = flume::unbounded();
        transport
            .subscribe(
                Subject::parse(pattern).unwrap(),
                Arc::new(move |m: &Message| {
                    let _ = tx.send(m.clone());
                }),
            )
            .unwrap();
        rx
    }

    #[test]
    fn test_connect_and_exchange() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let (acceptor, connector) = pair(&transport);

        assert_eq!(acceptor.peer().as_ref(), Some(connector.connect_subject()));
        assert_eq!(connector.peer().as_ref(), Some(acceptor.connect_subject()));

        let inbound = collect(&acceptor.transport(), "WORK");
        connector
            .transport()
            .send(Message::to(Subject::literal("WORK").unwrap()).with_u32("x", 4))
            .unwrap();

        let got = inbound.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got.get_u32("x").unwrap(), 4);
        assert_eq!(got.send_subject().unwrap().as_str(), "WORK");
    }

    #[test]
    fn test_circuit_traffic_is_point_to_point() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let (_acceptor, connector) = pair(&transport);

        // A plain subscriber on the shared bus never sees the inner subject.
        let broadcast = collect(&transport, "WORK");
        connector
            .transport()
            .send(Message::to(Subject::literal("WORK").unwrap()))
            .unwrap();
        assert!(broadcast.try_recv().is_err());
    }

    #[test]
    fn test_send_before_connect_fails() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let nowhere = Subject::literal("NOBODY").unwrap();
        let connector = VirtualCircuit::connect(&transport, &nowhere, fast()).unwrap();

        let err = connector
            .transport()
            .send(Message::to(Subject::literal("WORK").unwrap()))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));

        let err = connector
            .wait_for_connection(Duration::from_millis(30))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(connector.state(), CircuitState::Waiting);
    }

    #[test]
    fn test_close_notifies_peer() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let (acceptor, connector) = pair(&transport);
        let advisories = collect(&acceptor.transport(), advisory::DISCONNECTED_PATTERN);

        connector.close();
        assert_eq!(connector.state(), CircuitState::Disconnected);

        let msg = advisories.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(
            CircuitEvent::from_message(&msg),
            Some(CircuitEvent::Disconnected {
                reason: "closed by peer".into()
            })
        );
        assert_eq!(acceptor.state(), CircuitState::Disconnected);

        let err = connector
            .transport()
            .send(Message::to(Subject::literal("WORK").unwrap()))
            .unwrap_err();
        assert!(err.is_disconnected());
    }

    #[test]
    fn test_silent_peer_times_out() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let fake_acceptor = Subject::literal("FAKE.ACCEPTOR").unwrap();

        // Accept by hand, then never heartbeat.
        let replier = transport.clone();
        let accepted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let once = accepted.clone();
        transport
            .subscribe(
                fake_acceptor.clone(),
                Arc::new(move |req: &Message| {
                    if once.swap(true, std::sync::atomic::Ordering::SeqCst) {
                        return;
                    }
                    let accept = Message::new()
                        .with_reply_subject(Subject::literal("FAKE.ACCEPTOR.INBOX").unwrap())
                        .with_u32(CONTROL_FIELD, Control::Accept as u32);
                    let _ = replier.send_reply(accept, req);
                }),
            )
            .unwrap();

        let connector = VirtualCircuit::connect(&transport, &fake_acceptor, fast()).unwrap();
        let advisories = collect(&connector.transport(), advisory::DISCONNECTED_PATTERN);
        connector
            .wait_for_connection(Duration::from_secs(1))
            .unwrap();

        let msg = advisories.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(msg.get_string("reason").unwrap(), "peer timeout");
        assert_eq!(connector.state(), CircuitState::Disconnected);
    }

    #[test]
    fn test_acceptor_binds_single_peer() {
        let transport = Transport::new(Arc::new(LocalBus::new("vc")));
        let (acceptor, first) = pair(&transport);

        let second =
            VirtualCircuit::connect(&transport, acceptor.connect_subject(), fast()).unwrap();
        let err = second
            .wait_for_connection(Duration::from_millis(50))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(acceptor.peer().as_ref(), Some(first.connect_subject()));
    }
}
