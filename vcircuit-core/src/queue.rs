//! Event queues and dispatch threads.
//!
//! A [`Queue`] is a FIFO of ready-to-run events. Listeners and timers push
//! events; whoever calls [`Queue::dispatch`] runs them, one at a time, on the
//! calling thread. A [`Dispatcher`] is a named thread that does nothing but
//! dispatch one queue.
//!
//! ```
//! use vcircuit_core::queue::{Dispatcher, Queue};
//! use std::time::Duration;
//!
//! let queue = Queue::new("work");
//! let (tx, rx) = flume::bounded(1);
//!
//! let dispatcher = Dispatcher::spawn(&queue).unwrap();
//! queue.push(move || { let _ = tx.send(42); }).unwrap();
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
//! drop(dispatcher);
//! ```

use crate::error::{Result, TransportError};
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// A unit of work run by a dispatcher.
pub type Event = Box<dyn FnOnce() + Send + 'static>;

struct QueueInner {
    name: String,
    /// `None` once destroyed; dropping the sender wakes blocked dispatchers.
    tx: RwLock<Option<Sender<Event>>>,
    rx: Receiver<Event>,
}

/// FIFO event queue. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                tx: RwLock::new(Some(tx)),
                rx,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue an event.
    ///
    /// Fails with `Closed` after [`destroy`](Self::destroy).
    pub fn push<F>(&self, event: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.inner.tx.read();
        let tx = guard.as_ref().ok_or_else(|| self.closed())?;
        tx.send(Box::new(event)).map_err(|_| self.closed())
    }

    /// Block until one event is available and run it.
    pub fn dispatch(&self) -> Result<()> {
        match self.inner.rx.recv() {
            Ok(event) => {
                event();
                Ok(())
            }
            Err(_) => Err(self.closed()),
        }
    }

    /// Run one event, waiting at most `timeout` for it to arrive.
    ///
    /// # Errors
    ///
    /// - `Timeout` if nothing arrived in time
    /// - `Closed` if the queue was destroyed
    pub fn timed_dispatch(&self, timeout: Duration) -> Result<()> {
        match self.inner.rx.recv_timeout(timeout) {
            Ok(event) => {
                event();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    /// Run one event if one is ready. Returns whether an event ran.
    pub fn poll(&self) -> Result<bool> {
        match self.inner.rx.try_recv() {
            Ok(event) => {
                event();
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.rx.is_empty()
    }

    /// Discard pending events and wake every blocked dispatcher.
    pub fn destroy(&self) {
        let tx = self.inner.tx.write().take();
        if tx.is_none() {
            return;
        }
        drop(tx);
        let dropped = self.inner.rx.drain().count();
        debug!(queue = %self.inner.name, dropped, "[QUEUE] Destroyed");
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.tx.read().is_none()
    }

    fn closed(&self) -> TransportError {
        TransportError::closed(format!("queue '{}'", self.inner.name))
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("pending", &self.len())
            .finish()
    }
}

/// A thread dispatching one queue.
///
/// Runs until the queue is destroyed or the dispatcher is dropped. Dropping
/// waits for the event currently running to finish.
pub struct Dispatcher {
    queue: Queue,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start a dispatch thread named after the queue.
    pub fn spawn(queue: &Queue) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_queue = queue.clone();
        let worker_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("dispatch-{}", queue.name()))
            .spawn(move || {
                trace!(queue = %worker_queue.name(), "[DISPATCH] Started");
                while !worker_stop.load(Ordering::Acquire) {
                    if worker_queue.dispatch().is_err() {
                        break;
                    }
                }
                trace!(queue = %worker_queue.name(), "[DISPATCH] Stopped");
            })?;

        Ok(Self {
            queue: queue.clone(),
            stop,
            handle: Some(handle),
        })
    }

    /// The queue this dispatcher runs.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        // Wake a blocked dispatch; fails harmlessly on a destroyed queue.
        let _ = self.queue.push(|| {});

        if handle.thread().id() == thread::current().id() {
            return;
        }
        let _ = handle.join();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
