//! `DaemonBus`: a [`Bus`] whose traffic goes through a `vcdaemon`.
//!
//! All socket I/O happens on a dedicated thread running its own compio
//! runtime. Application threads hand frames to it over a flume channel, and
//! incoming publishes are delivered to local sinks from that thread.
//!
//! Publishes are never short-circuited locally: a client subscribed to a
//! subject it publishes on receives its own message back from the daemon,
//! exactly once.

use crate::codec::{decode_message, Frame};
use crate::conn::{read_frame, write_frames};
use crate::endpoint::DaemonAddr;
use crate::reconnect::Backoff;
use crate::tcp::enable_tcp_nodelay;
use bytes::Bytes;
use compio::net::TcpStream;
use compio::runtime::TryClone;
use flume::{Receiver, Sender};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};
use vcircuit_core::bus::{send_subject_of, Bus, DeliverySink, InboxGenerator, SinkTable, SubscriptionId};
use vcircuit_core::error::{Result, TransportError};
use vcircuit_core::message::Message;
use vcircuit_core::options::TransportOptions;
use vcircuit_core::subject::Subject;

/// Bus client of a daemon.
pub struct DaemonBus {
    name: String,
    table: Arc<SinkTable>,
    inbox: InboxGenerator,
    out: Sender<Bytes>,
    closed: Arc<AtomicBool>,
    daemon: SocketAddr,
}

impl DaemonBus {
    /// Connect to the daemon named by `options` and join its service.
    ///
    /// Blocks until the connection is established or every attempt failed.
    pub fn connect(options: &TransportOptions) -> Result<Arc<Self>> {
        let addr = DaemonAddr::parse(options.daemon_or_default())
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let (out, out_rx) = flume::unbounded::<Bytes>();
        let (ready_tx, ready_rx) = flume::bounded::<io::Result<SocketAddr>>(1);
        let table = Arc::new(SinkTable::new());
        let closed = Arc::new(AtomicBool::new(false));

        // The hello is the first frame the writer sends.
        let hello = Frame::Hello {
            service: options.service_or_default().to_string(),
            network: options.network.clone().unwrap_or_default(),
            description: options.description.clone(),
        }
        .encode()?;
        out.send(hello)
            .map_err(|_| TransportError::closed("daemon connection"))?;

        let io_options = options.clone();
        let io_table = table.clone();
        let io_closed = closed.clone();
        thread::Builder::new()
            .name("vc-daemon-io".to_string())
            .spawn(move || io_thread(addr, io_options, out_rx, io_table, io_closed, ready_tx))?;

        let daemon = ready_rx
            .recv()
            .map_err(|_| TransportError::closed("daemon I/O thread"))??;

        info!(%daemon, service = %options.service_or_default(), "[DAEMON] Connected");
        Ok(Arc::new(Self {
            name: format!("daemon:{daemon}"),
            table,
            inbox: InboxGenerator::new(),
            out,
            closed,
            daemon,
        }))
    }

    /// Address of the daemon this bus is connected to.
    #[must_use]
    pub const fn daemon_addr(&self) -> SocketAddr {
        self.daemon
    }

    /// Whether the daemon connection has been lost.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::closed(self.name.clone()));
        }
        self.out
            .send(frame.encode()?)
            .map_err(|_| TransportError::closed(self.name.clone()))
    }
}

impl Bus for DaemonBus {
    fn publish(&self, msg: Message) -> Result<()> {
        let subject = send_subject_of(&msg)?.clone();
        self.send_frame(&Frame::publish(subject, &msg)?)
    }

    fn subscribe(&self, pattern: Subject, sink: DeliverySink) -> Result<SubscriptionId> {
        if self.is_closed() {
            return Err(TransportError::closed(self.name.clone()));
        }
        let (id, first) = self.table.insert(pattern.clone(), sink);
        if first {
            if let Err(e) = self.send_frame(&Frame::Subscribe(pattern)) {
                self.table.remove(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((pattern, true)) = self.table.remove(id) {
            let _ = self.send_frame(&Frame::Unsubscribe(pattern));
        }
    }

    fn new_inbox(&self) -> Subject {
        self.inbox.next()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DaemonBus {
    fn drop(&mut self) {
        // Dropping `out` ends the writer, which shuts down the socket and in
        // turn ends the reader once the daemon hangs up.
        debug!(bus = %self.name, "[DAEMON] Disconnecting");
    }
}

fn io_thread(
    addr: DaemonAddr,
    options: TransportOptions,
    out_rx: Receiver<Bytes>,
    table: Arc<SinkTable>,
    closed: Arc<AtomicBool>,
    ready: Sender<io::Result<SocketAddr>>,
) {
    let rt = match compio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    rt.block_on(async move {
        let stream = match connect_with_backoff(&addr, &options).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let mut reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let peer = stream.peer_addr();
        compio::runtime::spawn(write_frames(stream, out_rx, addr.to_string())).detach();
        match peer {
            Ok(peer) => {
                let _ = ready.send(Ok(peer));
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        }

        loop {
            let (kind, body) = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(daemon = %addr, "[DAEMON] Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(daemon = %addr, error = %e, "[DAEMON] Read failed");
                    break;
                }
            };

            match Frame::decode(kind, body) {
                Ok(Frame::Publish { subject, payload }) => match decode_message(payload) {
                    Ok(msg) => {
                        let hits = table.deliver(&subject, &msg);
                        trace!(%subject, hits, "[DAEMON] Delivered");
                    }
                    Err(e) => warn!(%subject, error = %e, "[DAEMON] Undecodable message"),
                },
                Ok(other) => debug!(frame = ?other, "[DAEMON] Unexpected frame from daemon"),
                Err(e) => {
                    warn!(daemon = %addr, error = %e, "[DAEMON] Protocol error");
                    break;
                }
            }
        }

        closed.store(true, Ordering::Release);
    });
}

async fn connect_with_backoff(addr: &DaemonAddr, options: &TransportOptions) -> io::Result<TcpStream> {
    let attempts = options.connect_attempts.max(1);
    let mut backoff = Backoff::new(options);
    let mut last_err = None;

    for attempt in 1..=attempts {
        let result = match addr.resolve() {
            Ok(target) => TcpStream::connect(target).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(stream) => {
                enable_tcp_nodelay(&stream)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(daemon = %addr, attempt, error = %e, "[DAEMON] Connect attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    compio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("no connection attempts made")))
}
