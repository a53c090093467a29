//! In-process alternative to the durable queue: tasks run directly on a
//! bounded [`WorkerPool`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::queue::TaskQueue;
use super::task::StartTask;
use crate::error::QueueError;
use crate::pipeline::Processor;
use crate::worker::{JobWaiter, WaitResult, WorkerPool};

pub struct LocalQueue {
    processor: Arc<Processor>,
    pool: WorkerPool<JobWaiter>,
}

impl LocalQueue {
    /// Creates the queue and the stream its finished attempts are posted to.
    pub fn new(
        processor: Arc<Processor>,
        limit: usize,
        handle: Handle,
    ) -> (Self, mpsc::Receiver<WaitResult<JobWaiter>>) {
        let (pool, results) = WorkerPool::new(limit, handle);
        (Self { processor, pool }, results)
    }

    /// Asks every running attempt to stop and rejects new tasks.
    pub fn cancel(&self) {
        self.pool.cancel();
    }

    /// Rejects new tasks, waits for the scheduled ones, then closes the
    /// result stream.
    pub async fn wait_and_close(&self) {
        self.pool.wait_and_close().await;
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, task: &StartTask) -> Result<(), QueueError> {
        let waiter = JobWaiter::new(Arc::clone(&self.processor), task.clone());
        if self.pool.add(waiter) {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }
}
