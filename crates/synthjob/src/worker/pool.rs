use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::instrument::WithSubscriber;
use tracing::{debug, Instrument};
use uuid::Uuid;

use super::waiter::Waiter;

/// Capacity of the completion stream.
pub const RESULT_BUFFER: usize = 100;

/// Outcome of one waiter, posted in completion order.
pub struct WaitResult<W: Waiter> {
    pub waiter: Arc<W>,
    pub result: Result<(), W::Error>,
}

struct Inner<W: Waiter> {
    permits: Option<Arc<Semaphore>>,
    registry: Mutex<HashMap<Uuid, Arc<W>>>,
    closed: AtomicBool,
    cancelled: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    sender: Mutex<Option<mpsc::Sender<WaitResult<W>>>>,
}

/// Runs waiters on a tokio runtime with at most `limit` of them inside
/// `wait` at once (0 means no limit). Cancellation is only signalled to
/// the waiters, never forced.
pub struct WorkerPool<W: Waiter> {
    handle: Handle,
    inner: Arc<Inner<W>>,
}

impl<W: Waiter> WorkerPool<W> {
    /// Creates a pool spawning onto `handle` and returns it together with
    /// the receiving end of its completion stream.
    pub fn new(limit: usize, handle: Handle) -> (Self, mpsc::Receiver<WaitResult<W>>) {
        let (sender, receiver) = mpsc::channel(RESULT_BUFFER);
        let permits = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));

        let pool = Self {
            handle,
            inner: Arc::new(Inner {
                permits,
                registry: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                sender: Mutex::new(Some(sender)),
            }),
        };
        (pool, receiver)
    }

    /// Schedules a waiter. Returns `false` without running it once the pool
    /// has started shutting down.
    pub fn add(&self, waiter: W) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!("Worker pool closed, rejecting waiter");
            return false;
        }
        let sender = match self.inner.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => return false,
            },
            Err(_) => return false,
        };

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let waiter = Arc::new(waiter);

        let task = async move {
            let _permit = match inner.permits {
                Some(ref permits) => match Arc::clone(permits).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => None,
                },
                None => None,
            };

            let key = Uuid::new_v4();
            if let Ok(mut registry) = inner.registry.lock() {
                registry.insert(key, Arc::clone(&waiter));
            }
            // A cancel() that ran before registration did not reach us.
            if inner.cancelled.load(Ordering::SeqCst) {
                waiter.cancel();
            }

            let result = waiter.wait().await;

            if let Ok(mut registry) = inner.registry.lock() {
                registry.remove(&key);
            }
            let _ = sender.send(WaitResult { waiter, result }).await;
            drop(sender);

            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        };

        self.handle
            .spawn(task.in_current_span().with_current_subscriber());
        true
    }

    /// Closes the pool to new work and asks every registered waiter to
    /// stop. Waiters still queued for a permit are cancelled as soon as
    /// they are registered.
    pub fn cancel(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let waiters: Vec<Arc<W>> = match self.inner.registry.lock() {
            Ok(registry) => registry.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        debug!(count = waiters.len(), "Cancelling registered waiters");
        for waiter in waiters {
            waiter.cancel();
        }
    }

    /// Closes the pool to new work, waits until every scheduled waiter has
    /// posted its result, then closes the completion stream.
    pub async fn wait_and_close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }

        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Waiters scheduled but not yet finished, including those queued for
    /// a permit.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}
