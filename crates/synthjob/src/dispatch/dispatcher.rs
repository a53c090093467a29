//! Queue consumer: one poller thread feeding N worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use tracing::Dispatch;

use super::queue::{Delivery, TaskSource};
use crate::pipeline::{JobError, Processor};

const HANDOFF_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Dispatcher {
    poller: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Starts the poller and `worker_count` worker threads. Every thread
    /// logs through `dispatch`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        source: Arc<dyn TaskSource>,
        processor: Arc<Processor>,
        worker_count: usize,
        poll_interval: Duration,
        dispatch: Dispatch,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        // Rendezvous: the poller holds at most one claimed task no worker
        // has taken yet.
        let (sender, receiver) = bounded::<Delivery>(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let source = Arc::clone(&source);
            let processor = Arc::clone(&processor);
            let shutdown = Arc::clone(&shutdown);
            let cancel = cancel.clone();
            let dispatch = dispatch.clone();

            let handle = thread::Builder::new()
                .name(format!("synthjob-worker-{}", worker_id))
                .spawn(move || {
                    let _guard = tracing::dispatcher::set_default(&dispatch);
                    run_worker(worker_id, receiver, source, processor, shutdown, cancel);
                });
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        let poller = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("synthjob-poller".to_string())
                .spawn(move || {
                    let _guard = tracing::dispatcher::set_default(&dispatch);
                    run_poller(source, sender, shutdown, poll_interval);
                })
                .inspect_err(|e| error!("Failed to spawn poller: {}", e))
                .ok()
        };

        info!("Started {} workers", workers.len());

        Self {
            poller,
            workers,
            shutdown,
            cancel,
        }
    }

    /// Stops claiming new tasks. Running attempts finish normally.
    pub fn shutdown(&self) {
        info!("Shutting down dispatcher...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops claiming new tasks and cancels running attempts.
    pub fn cancel(&self) {
        self.shutdown();
        self.cancel.cancel();
    }

    /// Token that cancels the running attempts when fired.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Blocks until every thread has exited. Call after `shutdown`.
    pub fn wait(self) {
        if let Some(poller) = self.poller {
            if let Err(e) = poller.join() {
                error!("Poller panicked: {:?}", e);
            }
        }
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

fn run_poller(
    source: Arc<dyn TaskSource>,
    sender: Sender<Delivery>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Poller started");

    'poll: while !shutdown.load(Ordering::Relaxed) {
        let mut delivery = match source.receive() {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                thread::sleep(poll_interval);
                continue;
            }
            Err(e) => {
                error!("Failed to receive task: {}", e);
                thread::sleep(poll_interval);
                continue;
            }
        };
        debug!("Claimed task {} for {}", delivery.id, delivery.task.rid);

        loop {
            match sender.send_timeout(delivery, HANDOFF_TIMEOUT) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if shutdown.load(Ordering::Relaxed) {
                        // Leave the lease to expire; the task is redelivered later.
                        warn!("Shutting down with unstarted task {}", pending.id);
                        break 'poll;
                    }
                    delivery = pending;
                }
                Err(SendTimeoutError::Disconnected(pending)) => {
                    error!("No workers left, dropping claim on task {}", pending.id);
                    break 'poll;
                }
            }
        }
    }

    debug!("Poller stopped");
}

fn run_worker(
    worker_id: usize,
    receiver: Receiver<Delivery>,
    source: Arc<dyn TaskSource>,
    processor: Arc<Processor>,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Worker {} failed to build runtime: {}", worker_id, e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(delivery) => {
                debug!(
                    "Worker {} processing {} (attempt {})",
                    worker_id, delivery.task.rid, delivery.attempt
                );
                let token = cancel.child_token();
                let result = runtime.block_on(processor.process(&delivery.task, &token));
                settle(source.as_ref(), &delivery, result);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Acks or retries a finished delivery.
fn settle<T>(source: &dyn TaskSource, delivery: &Delivery, result: Result<T, JobError>) {
    let settled = match result {
        Ok(_) => source.ack(delivery),
        Err(e) if e.is_retryable() => {
            warn!("Task {} failed, will retry: {}", delivery.id, e);
            source.retry(delivery, &e.to_string())
        }
        Err(JobError::InvalidState { rid, status }) => {
            info!("Dropping duplicate delivery of {} ({})", rid, status);
            source.ack(delivery)
        }
        Err(e @ JobError::Expired { .. }) => {
            warn!("Burying task {}: {}", delivery.id, e);
            source.bury(delivery, &e.to_string())
        }
        Err(e) => {
            error!("Task {} failed: {}", delivery.id, e);
            source.ack(delivery)
        }
    };
    if let Err(e) = settled {
        error!("Failed to settle task {}: {}", delivery.id, e);
    }
}
