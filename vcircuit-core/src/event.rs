//! Listeners and timers: the two event sources that feed a [`Queue`].

use crate::bus::{DeliverySink, SubscriptionId};
use crate::error::Result;
use crate::message::Message;
use crate::queue::Queue;
use crate::subject::Subject;
use crate::transport::Transport;
use flume::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Subscription whose callback runs on a queue.
///
/// Detached on [`destroy`](Self::destroy) or drop. Events already queued
/// for a destroyed listener are discarded when dispatched.
pub struct Listener {
    transport: Transport,
    pattern: Subject,
    subscription: SubscriptionId,
    active: Arc<AtomicBool>,
}

impl Listener {
    /// Subscribe `pattern` on `transport`, running `callback` on `queue`.
    pub fn new<F>(queue: &Queue, transport: &Transport, pattern: Subject, callback: F) -> Result<Self>
    where
        F: FnMut(&Message) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let callback = Arc::new(Mutex::new(callback));

        let sink_queue = queue.clone();
        let sink_active = active.clone();
        let sink: DeliverySink = Arc::new(move |msg: &Message| {
            if !sink_active.load(Ordering::Acquire) {
                return;
            }
            let msg = msg.clone();
            let active = sink_active.clone();
            let callback = callback.clone();
            let pushed = sink_queue.push(move || {
                if active.load(Ordering::Acquire) {
                    let mut callback = callback.lock();
                    (*callback)(&msg);
                }
            });
            if pushed.is_err() {
                trace!(queue = %sink_queue.name(), "[LISTENER] Queue gone, message dropped");
            }
        });

        let subscription = transport.subscribe(pattern.clone(), sink)?;
        debug!(
            transport = %transport.description(),
            %pattern,
            queue = %queue.name(),
            "[LISTENER] Created"
        );

        Ok(Self {
            transport: transport.clone(),
            pattern,
            subscription,
            active,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &Subject {
        &self.pattern
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Detach from the transport. Idempotent.
    pub fn destroy(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.transport.unsubscribe(self.subscription);
            debug!(pattern = %self.pattern, "[LISTENER] Destroyed");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Cancellation handle passed to a timer callback.
#[derive(Clone)]
pub struct TimerHandle {
    active: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Stop the timer. Safe to call from inside its own callback.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Recurring timer whose callback runs on a queue.
pub struct Timer {
    handle: TimerHandle,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Fire `callback` on `queue` every `interval`, starting one interval
    /// from now.
    pub fn new<F>(queue: &Queue, interval: Duration, callback: F) -> Result<Self>
    where
        F: FnMut(&TimerHandle) + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let handle = TimerHandle {
            active: Arc::new(AtomicBool::new(true)),
        };
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let callback = Arc::new(Mutex::new(callback));

        let tick_queue = queue.clone();
        let tick_handle = handle.clone();
        let thread = thread::Builder::new()
            .name(format!("timer-{}", queue.name()))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                if !tick_handle.is_active() {
                    break;
                }

                let handle = tick_handle.clone();
                let callback = callback.clone();
                let pushed = tick_queue.push(move || {
                    if handle.is_active() {
                        let mut callback = callback.lock();
                        (*callback)(&handle);
                    }
                });
                if pushed.is_err() {
                    break;
                }
            })?;

        trace!(queue = %queue.name(), ?interval, "[TIMER] Started");
        Ok(Self {
            handle,
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn cancel(&self) {
        self.handle.cancel();
        let _ = self.stop_tx.try_send(());
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::queue::Dispatcher;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_listener_runs_on_queue() {
        let transport = Transport::new(Arc::new(LocalBus::new("listener")));
        let queue = Queue::new("listener");
        let (tx, rx) = flume::unbounded();

        let _listener = Listener::new(
            &queue,
            &transport,
            Subject::parse("JOBS.*").unwrap(),
            move |msg| tx.send(msg.get_u32("n").unwrap()).unwrap(),
        )
        .unwrap();

        transport
            .send(Message::to(Subject::literal("JOBS.A").unwrap()).with_u32("n", 1))
            .unwrap();
        // Delivery only queues; nothing runs until dispatch.
        assert!(rx.try_recv().is_err());

        queue.dispatch().unwrap();
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_destroyed_listener_discards_queued_events() {
        let bus = Arc::new(LocalBus::new("listener"));
        let transport = Transport::new(bus.clone());
        let queue = Queue::new("listener");
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();

        let listener = Listener::new(&queue, &transport, Subject::parse("A").unwrap(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        transport
            .send(Message::to(Subject::literal("A").unwrap()))
            .unwrap();
        listener.destroy();
        assert_eq!(bus.subscription_count(), 0);

        while queue.poll().unwrap() {}
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timer_cancels_itself() {
        let queue = Queue::new("timer");
        let dispatcher = Dispatcher::spawn(&queue).unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let (done_tx, done_rx) = flume::bounded(1);

        let counter = fired.clone();
        let timer = Timer::new(&queue, Duration::from_millis(2), move |handle| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                handle.cancel();
                let _ = done_tx.try_send(());
            }
        })
        .unwrap();

        done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!timer.is_active());
        assert_eq!(fired.load(Ordering::SeqCst), 5);

        drop(timer);
        drop(dispatcher);
    }
}
