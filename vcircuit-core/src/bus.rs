//! Message buses: the substrate every transport, listener and circuit sits on.
//!
//! A [`Bus`] moves [`Message`]s between publishers and subject-pattern
//! subscriptions. Two implementations exist:
//!
//! - [`LocalBus`] (this module): in-process delivery. Named buses are kept in
//!   a process-wide registry so independent components (e.g. a client and a
//!   server running on different threads) can share one by name.
//! - `DaemonBus` (`vcircuit-wire`): delivery through a `vcdaemon` over TCP.
//!
//! Sinks are invoked on the delivering thread and must not block; the usual
//! sink pushes an event onto a [`Queue`](crate::queue::Queue).
//!
//! # Usage
//!
//! ```rust
//! use vcircuit_core::bus::{Bus, LocalBus};
//! use vcircuit_core::message::Message;
//! use vcircuit_core::subject::Subject;
//! use std::sync::Arc;
//!
//! # fn example() -> vcircuit_core::error::Result<()> {
//! let bus = LocalBus::open("docs-bus");
//! let (tx, rx) = flume::unbounded();
//!
//! bus.subscribe(
//!     Subject::parse("DEMO.>")?,
//!     Arc::new(move |msg: &Message| {
//!         let _ = tx.send(msg.clone());
//!     }),
//! )?;
//!
//! bus.publish(Message::to(Subject::literal("DEMO.HELLO")?).with_u32("n", 1))?;
//! assert_eq!(rx.recv().unwrap().get_u32("n")?, 1);
//!
//! LocalBus::close("docs-bus");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::error::{Result, TransportError};
use crate::index::SubscriptionIndex;
use crate::message::Message;
use crate::subject::{Subject, INBOX_PREFIX};
use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle of a subscription on a bus.
pub type SubscriptionId = u64;

/// Delivery callback attached to a subscription.
pub type DeliverySink = Arc<dyn Fn(&Message) + Send + Sync>;

/// The substrate seam.
pub trait Bus: Send + Sync {
    /// Deliver `msg` to every subscription matching its send subject.
    fn publish(&self, msg: Message) -> Result<()>;

    /// Attach `sink` to `pattern`.
    fn subscribe(&self, pattern: Subject, sink: DeliverySink) -> Result<SubscriptionId>;

    /// Detach a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Generate a subject unique to this bus instance.
    fn new_inbox(&self) -> Subject;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Validate that a message can be published and return its send subject.
pub fn send_subject_of(msg: &Message) -> Result<&Subject> {
    let subject = msg
        .send_subject()
        .ok_or_else(|| TransportError::field("send subject", "missing"))?;
    if subject.is_pattern() {
        return Err(TransportError::invalid_subject(
            subject.as_str(),
            "wildcards are not allowed in send subjects",
        ));
    }
    Ok(subject)
}

struct SinkEntry {
    pattern: Subject,
    sink: DeliverySink,
}

#[derive(Default)]
struct SinkTableInner {
    index: SubscriptionIndex,
    sinks: HashMap<SubscriptionId, SinkEntry>,
    pattern_refs: HashMap<Subject, usize>,
    next_id: SubscriptionId,
}

/// Subscription bookkeeping shared by bus implementations.
///
/// Tracks per-pattern reference counts so a bus that forwards interest
/// upstream (the daemon client) registers each pattern once.
#[derive(Default)]
pub struct SinkTable {
    inner: RwLock<SinkTableInner>,
}

impl SinkTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink. Returns the id and whether `pattern` is new.
    pub fn insert(&self, pattern: Subject, sink: DeliverySink) -> (SubscriptionId, bool) {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;

        inner.index.subscribe(id, pattern.clone());
        let refs = inner.pattern_refs.entry(pattern.clone()).or_insert(0);
        *refs += 1;
        let first = *refs == 1;
        inner.sinks.insert(id, SinkEntry { pattern, sink });

        (id, first)
    }

    /// Remove a sink. Returns its pattern and whether that was the last
    /// sink on the pattern.
    pub fn remove(&self, id: SubscriptionId) -> Option<(Subject, bool)> {
        let mut inner = self.inner.write();
        let entry = inner.sinks.remove(&id)?;
        inner.index.unsubscribe(id, &entry.pattern);

        let last = match inner.pattern_refs.get_mut(&entry.pattern) {
            Some(refs) if *refs > 1 => {
                *refs -= 1;
                false
            }
            _ => {
                inner.pattern_refs.remove(&entry.pattern);
                true
            }
        };

        Some((entry.pattern, last))
    }

    /// Patterns with at least one sink.
    #[must_use]
    pub fn patterns(&self) -> Vec<Subject> {
        self.inner.read().pattern_refs.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().sinks.is_empty()
    }

    /// Invoke every sink matching `subject`. Returns the number of sinks hit.
    ///
    /// Sinks run after the table lock is released, so a sink may publish or
    /// (un)subscribe on the same bus.
    pub fn deliver(&self, subject: &Subject, msg: &Message) -> usize {
        let sinks: Vec<DeliverySink> = {
            let inner = self.inner.read();
            inner
                .index
                .match_subject(subject)
                .iter()
                .filter_map(|id| inner.sinks.get(id).map(|e| e.sink.clone()))
                .collect()
        };

        for sink in &sinks {
            sink(msg);
        }
        sinks.len()
    }
}

/// Generator for `_INBOX.<bus-id>.<n>` subjects.
pub struct InboxGenerator {
    bus_id: String,
    counter: AtomicU64,
}

impl InboxGenerator {
    /// Create a generator with a random bus id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus_id: format!("{:016x}", rand::random::<u64>()),
            counter: AtomicU64::new(0),
        }
    }

    /// Next unique inbox subject.
    pub fn next(&self) -> Subject {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Subject::literal(&format!("{INBOX_PREFIX}.{}.{n}", self.bus_id))
            .unwrap_or_else(|_| unreachable!("generated inbox subjects are always valid"))
    }
}

impl Default for InboxGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry of named local buses
static LOCAL_REGISTRY: once_cell::sync::Lazy<DashMap<String, Arc<LocalBus>>> =
    once_cell::sync::Lazy::new(DashMap::new);

/// Process-local bus used for self-addressed traffic
static PROCESS_BUS: once_cell::sync::Lazy<Arc<LocalBus>> =
    once_cell::sync::Lazy::new(|| Arc::new(LocalBus::new("process")));

/// In-process bus.
///
/// Delivery is synchronous: `publish` runs matching sinks on the caller's
/// thread before returning.
pub struct LocalBus {
    name: String,
    table: SinkTable,
    inbox: InboxGenerator,
    closed: AtomicBool,
}

impl LocalBus {
    /// Create an unregistered bus.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: SinkTable::new(),
            inbox: InboxGenerator::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Open (or create) the named bus in the process registry.
    ///
    /// All callers opening the same name share one bus.
    pub fn open(name: &str) -> Arc<Self> {
        LOCAL_REGISTRY
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(bus = name, "[BUS] Created local bus");
                Arc::new(Self::new(name))
            })
            .clone()
    }

    /// Remove the named bus from the registry and close it.
    ///
    /// Handles still held elsewhere fail subsequent publishes with `Closed`.
    pub fn close(name: &str) {
        if let Some((_, bus)) = LOCAL_REGISTRY.remove(name) {
            bus.shutdown();
        }
    }

    /// Mark this bus closed.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.table.len()
    }
}

impl Bus for LocalBus {
    fn publish(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::closed(format!("bus '{}'", self.name)));
        }
        let subject = send_subject_of(&msg)?;
        let hits = self.table.deliver(subject, &msg);
        trace!(bus = %self.name, %subject, hits, "[BUS] Published");
        Ok(())
    }

    fn subscribe(&self, pattern: Subject, sink: DeliverySink) -> Result<SubscriptionId> {
        if self.is_closed() {
            return Err(TransportError::closed(format!("bus '{}'", self.name)));
        }
        let (id, _) = self.table.insert(pattern, sink);
        Ok(id)
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

/// The process-local bus (self-addressed messages never leave the process).
#[must_use]
pub fn process_bus() -> Arc<LocalBus> {
    PROCESS_BUS.clone()
}

/// List all currently registered local bus names.
///
/// This is primarily useful for debugging and testing.
#[must_use]
pub fn list_local_buses() -> Vec<String> {
    LOCAL_REGISTRY
        .iter()
        .map(|entry| entry.key().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_sink(counter: &Arc<AtomicUsize>) -> DeliverySink {
        let counter = counter.clone();
        Arc::new(move |_msg: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_open_shares_by_name() {
        let a = LocalBus::open("test-bus-share");
        let b = LocalBus::open("test-bus-share");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(list_local_buses().contains(&"test-bus-share".to_string()));

        LocalBus::close("test-bus-share");
        assert!(a.is_closed());
        assert!(!list_local_buses().contains(&"test-bus-share".to_string()));
    }

    #[test]
    fn test_publish_reaches_matching_sinks() {
        let bus = LocalBus::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Subject::parse("A.*").unwrap(), counting_sink(&hits))
            .unwrap();
        bus.subscribe(Subject::parse("B").unwrap(), counting_sink(&hits))
            .unwrap();

        bus.publish(Message::to(Subject::literal("A.X").unwrap())).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.publish(Message::to(Subject::literal("C").unwrap())).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = LocalBus::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        let id = bus
            .subscribe(Subject::parse("A").unwrap(), counting_sink(&hits))
            .unwrap();
        bus.unsubscribe(id);

        bus.publish(Message::to(Subject::literal("A").unwrap())).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_publish_requires_literal_subject() {
        let bus = LocalBus::new("test");
        assert!(bus.publish(Message::new()).is_err());
        assert!(bus
            .publish(Message::to(Subject::parse("A.*").unwrap()))
            .is_err());
    }

    #[test]
    fn test_closed_bus_rejects_publish() {
        let bus = LocalBus::new("test");
        bus.shutdown();
        let err = bus
            .publish(Message::to(Subject::literal("A").unwrap()))
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_sink_table_pattern_refcounts() {
        let table = SinkTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let p = Subject::parse("A.>").unwrap();

        let (a, first_a) = table.insert(p.clone(), counting_sink(&hits));
        let (b, first_b) = table.insert(p.clone(), counting_sink(&hits));
        assert!(first_a);
        assert!(!first_b);

        assert_eq!(table.remove(a), Some((p.clone(), false)));
        assert_eq!(table.remove(b), Some((p, true)));
        assert_eq!(table.remove(b), None);
        assert!(table.patterns().is_empty());
    }

    #[test]
    fn test_inboxes_are_unique() {
        let bus = LocalBus::new("test");
        let a = bus.new_inbox();
        let b = bus.new_inbox();
        assert_ne!(a, b);
        assert!(a.is_inbox());
    }
}
