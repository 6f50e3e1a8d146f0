//! The message daemon (`vcdaemon`).
//!
//! One reader task and one writer task per client connection, plus a single
//! [`Hub`] task that owns all routing state. Everything runs on the compio
//! runtime of the thread that calls [`Daemon::run`].

use crate::codec::{Frame, HEADER_LEN};
use crate::conn::{read_frame, write_frames};
use crate::endpoint::DaemonAddr;
use crate::hub::{Hub, HubEvent, PeerKey};
use crate::tcp::enable_tcp_nodelay;
use bytes::{BufMut, Bytes, BytesMut};
use compio::net::{TcpListener, TcpStream};
use compio::runtime::TryClone;
use flume::Sender;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// A bound daemon, ready to [`run`](Self::run).
pub struct Daemon {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Daemon {
    /// Bind to a daemon address (`7500`, `host:7500`, `tcp:host:7500`).
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let addr = DaemonAddr::parse(addr)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .resolve()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "[DAEMON] Listening");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients forever. Returns only on an accept error.
    pub async fn run(self) -> io::Result<()> {
        let (hub_tx, hub_rx) = flume::unbounded();
        compio::runtime::spawn(Hub::new().run(hub_rx)).detach();

        let mut next_peer: PeerKey = 1;
        loop {
            let (stream, remote) = self.listener.accept().await?;
            if let Err(e) = enable_tcp_nodelay(&stream) {
                warn!(%remote, error = %e, "[DAEMON] Failed to set TCP_NODELAY");
            }

            let peer = next_peer;
            next_peer += 1;
            debug!(peer, %remote, "[DAEMON] Accepted connection");

            compio::runtime::spawn(serve_peer(stream, remote, peer, hub_tx.clone())).detach();
        }
    }
}

async fn serve_peer(stream: TcpStream, remote: SocketAddr, peer: PeerKey, hub: Sender<HubEvent>) {
    let mut reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            warn!(peer, error = %e, "[DAEMON] Failed to clone stream");
            return;
        }
    };

    let (tx, rx) = flume::unbounded();
    if hub.send(HubEvent::PeerUp { peer, tx }).is_err() {
        return;
    }
    compio::runtime::spawn(write_frames(stream, rx, format!("peer-{peer}"))).detach();

    loop {
        let (kind, body) = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(peer, %remote, "[DAEMON] Client disconnected");
                break;
            }
            Err(e) => {
                debug!(peer, %remote, error = %e, "[DAEMON] Read failed");
                break;
            }
        };

        let event = match Frame::decode(kind, body.clone()) {
            Ok(Frame::Hello {
                service,
                network,
                description,
            }) => HubEvent::Hello {
                peer,
                service,
                network,
                description,
            },
            Ok(Frame::Subscribe(pattern)) => HubEvent::Subscribe { peer, pattern },
            Ok(Frame::Unsubscribe(pattern)) => HubEvent::Unsubscribe { peer, pattern },
            Ok(Frame::Publish { subject, .. }) => HubEvent::Publish {
                peer,
                subject,
                frame: reframe(kind, &body),
            },
            Err(e) => {
                warn!(peer, %remote, error = %e, "[DAEMON] Protocol error, dropping client");
                break;
            }
        };

        if hub.send(event).is_err() {
            break;
        }
    }

    let _ = hub.send(HubEvent::PeerDown { peer });
}

/// Rebuild the frame bytes from a header kind and body, once per publish.
fn reframe(kind: u8, body: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u8(kind);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(body);
    out.freeze()
}
