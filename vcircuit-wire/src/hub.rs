//! Daemon hub
//!
//! Responsibilities:
//! - Track connected clients (peers) and the service each one joined.
//! - Apply Subscribe / Unsubscribe frames to a per-service subject index.
//! - Fan out Publish frames to every matching peer on the same service,
//!   including the publisher (zero-copy via `Bytes`).
//!
//! Concurrency model:
//! - Single async task fed by one flume channel.
//! - Connection tasks never touch the index; they only send events.
//! - Peer keys come from a monotonic counter and are never reused, so a
//!   late `PeerDown` cannot remove a newer connection.

use bytes::Bytes;
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use tracing::{debug, info, trace};
use vcircuit_core::index::{SubscriberKey, SubscriptionIndex};
use vcircuit_core::subject::Subject;

/// Connection identifier assigned by the daemon.
pub type PeerKey = SubscriberKey;

/// Events from connection tasks to the hub.
#[derive(Debug)]
pub enum HubEvent {
    PeerUp {
        peer: PeerKey,
        tx: Sender<Bytes>,
    },
    Hello {
        peer: PeerKey,
        service: String,
        network: String,
        description: String,
    },
    Subscribe {
        peer: PeerKey,
        pattern: Subject,
    },
    Unsubscribe {
        peer: PeerKey,
        pattern: Subject,
    },
    /// `frame` is the complete encoded Publish frame, forwarded as-is.
    Publish {
        peer: PeerKey,
        subject: Subject,
        frame: Bytes,
    },
    PeerDown {
        peer: PeerKey,
    },
}

struct PeerState {
    service: String,
    tx: Sender<Bytes>,
}

/// Routing state of a daemon.
///
/// Does no I/O itself; it only moves already-encoded frames between
/// connection tasks.
#[derive(Default)]
pub struct Hub {
    peers: HashMap<PeerKey, PeerState>,
    services: HashMap<String, SubscriptionIndex>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Main event loop. Ends when every event sender is gone.
    pub async fn run(mut self, events: Receiver<HubEvent>) {
        while let Ok(ev) = events.recv_async().await {
            self.handle(ev);
        }
        debug!("[HUB] Event channel closed");
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn handle(&mut self, ev: HubEvent) {
        match ev {
            HubEvent::PeerUp { peer, tx } => {
                self.peers.insert(
                    peer,
                    PeerState {
                        service: String::new(),
                        tx,
                    },
                );
                debug!(peer, "[HUB] Peer up");
            }

            HubEvent::Hello {
                peer,
                service,
                network,
                description,
            } => {
                let Some(state) = self.peers.get_mut(&peer) else {
                    return;
                };
                // Interest registered before the hello moves with the peer.
                if state.service != service {
                    if let Some(index) = self.services.get_mut(&state.service) {
                        index.remove_key_everywhere(peer);
                    }
                }
                info!(
                    peer,
                    service = %service,
                    network = %network,
                    description = %description,
                    "[HUB] Client joined"
                );
                state.service = service;
            }

            HubEvent::Subscribe { peer, pattern } => {
                let Some(state) = self.peers.get(&peer) else {
                    return;
                };
                trace!(peer, %pattern, "[HUB] Subscribe");
                self.services
                    .entry(state.service.clone())
                    .or_default()
                    .subscribe(peer, pattern);
            }

            HubEvent::Unsubscribe { peer, pattern } => {
                let Some(state) = self.peers.get(&peer) else {
                    return;
                };
                trace!(peer, %pattern, "[HUB] Unsubscribe");
                if let Some(index) = self.services.get_mut(&state.service) {
                    index.unsubscribe(peer, &pattern);
                }
            }

            HubEvent::Publish {
                peer,
                subject,
                frame,
            } => self.publish(peer, &subject, &frame),

            HubEvent::PeerDown { peer } => {
                if let Some(state) = self.peers.remove(&peer) {
                    if let Some(index) = self.services.get_mut(&state.service) {
                        index.remove_key_everywhere(peer);
                        if index.is_empty() {
                            self.services.remove(&state.service);
                        }
                    }
                    debug!(peer, "[HUB] Peer down");
                }
            }
        }
    }

    fn publish(&mut self, from: PeerKey, subject: &Subject, frame: &Bytes) {
        let Some(service) = self.peers.get(&from).map(|p| p.service.as_str()) else {
            return;
        };
        let Some(index) = self.services.get(service) else {
            return;
        };

        let keys = index.match_subject(subject);
        trace!(from, %subject, fanout = keys.len(), "[HUB] Publish");

        for key in keys {
            if let Some(peer) = self.peers.get(&key) {
                let _ = peer.tx.send(frame.clone());
            }
        }
    }
}
