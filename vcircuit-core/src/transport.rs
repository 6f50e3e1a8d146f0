//! Transport facade over a [`Bus`].
//!
//! `Transport` is the handle application code uses to send, request and
//! reply. It is cheap to clone; every clone shares the same bus. Whether a
//! send is broadcast or point-to-point depends on the bus underneath: a
//! network bus fans out by subject, a virtual circuit's bus delivers only to
//! its peer.

use crate::bus::{process_bus, Bus, DeliverySink, LocalBus, SubscriptionId};
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::subject::Subject;
use flume::RecvTimeoutError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Handle for sending and subscribing on a bus.
#[derive(Clone)]
pub struct Transport {
    bus: Arc<dyn Bus>,
    description: Arc<str>,
}

impl Transport {
    /// Wrap a bus.
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        let description = Arc::from(bus.name());
        Self { bus, description }
    }

    /// Transport on the named in-process bus.
    #[must_use]
    pub fn local(name: &str) -> Self {
        Self::new(LocalBus::open(name))
    }

    /// Transport on the process-local bus.
    #[must_use]
    pub fn process() -> Self {
        Self::new(process_bus())
    }

    /// Set the description used in logs.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Arc::from(description);
        self
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The bus this transport sends on.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Send a message to its send subject.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.bus.publish(msg)
    }

    /// Send a request and wait for exactly one reply.
    ///
    /// The reply subject of `request` is replaced by a private inbox that
    /// only lives for the duration of this call.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no reply arrives within `timeout`
    /// - any error from the underlying publish
    pub fn send_request(&self, request: Message, timeout: Duration) -> Result<Message> {
        let inbox = self.bus.new_inbox();
        let (tx, rx) = flume::bounded(1);

        let sink: DeliverySink = Arc::new(move |reply: &Message| {
            let _ = tx.try_send(reply.clone());
        });
        let id = self.bus.subscribe(inbox.clone(), sink)?;

        let mut request = request;
        request.set_reply_subject(inbox.clone());
        trace!(transport = %self.description, %inbox, "[TRANSPORT] Sending request");

        let result = self.bus.publish(request).and_then(|()| {
            rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout(timeout),
                RecvTimeoutError::Disconnected => TransportError::closed("request inbox"),
            })
        });

        self.bus.unsubscribe(id);
        result
    }

    /// Send `reply` to the reply subject of `request`.
    pub fn send_reply(&self, reply: Message, request: &Message) -> Result<()> {
        let to = request
            .reply_subject()
            .ok_or_else(|| TransportError::field("reply subject", "request has none"))?
            .clone();

        let mut reply = reply;
        reply.set_send_subject(to);
        self.bus.publish(reply)
    }

    /// Create a subject unique to this transport's bus.
    #[must_use]
    pub fn create_inbox(&self) -> Subject {
        self.bus.new_inbox()
    }

    /// Attach a raw sink. Prefer [`Listener`](crate::event::Listener).
    pub fn subscribe(&self, pattern: Subject, sink: DeliverySink) -> Result<SubscriptionId> {
        self.bus.subscribe(pattern, sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("bus", &self.bus.name())
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_server(transport: &Transport, subject: &str) -> SubscriptionId {
        let replier = transport.clone();
        transport
            .subscribe(
                Subject::parse(subject).unwrap(),
                Arc::new(move |req: &Message| {
                    let reply = Message::new().with_u32("echo", req.get_u32("n").unwrap_or(0));
                    let _ = replier.send_reply(reply, req);
                }),
            )
            .unwrap()
    }

    #[test]
    fn test_send_request_gets_reply() {
        let transport = Transport::new(Arc::new(LocalBus::new("req")));
        echo_server(&transport, "SVC.ECHO");

        let request = Message::to(Subject::literal("SVC.ECHO").unwrap()).with_u32("n", 9);
        let reply = transport
            .send_request(request, Duration::from_secs(1))
            .unwrap();

        assert_eq!(reply.get_u32("echo").unwrap(), 9);
        assert!(reply.send_subject().unwrap().is_inbox());
    }

    #[test]
    fn test_send_request_times_out() {
        let transport = Transport::new(Arc::new(LocalBus::new("req")));
        let request = Message::to(Subject::literal("NOBODY.HOME").unwrap());

        let err = transport
            .send_request(request, Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_request_inbox_released() {
        let bus = Arc::new(LocalBus::new("req"));
        let transport = Transport::new(bus.clone());
        let request = Message::to(Subject::literal("NOBODY.HOME").unwrap());

        let _ = transport.send_request(request, Duration::from_millis(1));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_send_reply_requires_reply_subject() {
        let transport = Transport::new(Arc::new(LocalBus::new("req")));
        let err = transport
            .send_reply(Message::new(), &Message::new())
            .unwrap_err();
        assert!(err.to_string().contains("reply subject"));
    }
}
