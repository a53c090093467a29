//! Enqueue and receive sides of the task queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::task::{StartTask, START_TASK_KIND};
use crate::db::{queue_repo, Database};
use crate::error::QueueError;

/// Enqueue side.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &StartTask) -> Result<(), QueueError>;
}

/// A task handed to a consumer, to be acked or retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub task: StartTask,
    /// 1 on first delivery.
    pub attempt: u32,
    pub max_retry: u32,
}

/// Receive side. Calls block on the store and are made from plain threads.
pub trait TaskSource: Send + Sync {
    /// Claims the next available task, if any.
    fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// The task is done and must not be delivered again.
    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// The attempt failed in a way a later delivery may fix.
    fn retry(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError>;

    /// The task must never be delivered again, but is kept for inspection.
    fn bury(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError>;
}

/// Durable at-least-once queue over the `queue_tasks` table.
///
/// A claimed task stays leased for one attempt timeout plus `lease_grace`
/// from the moment it was claimed; a consumer that dies mid-attempt
/// therefore gets its task redelivered once the lease runs out.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    max_retry: u32,
    attempt_timeout: Duration,
    lease_grace: Duration,
    backoff: Duration,
}

impl SqliteQueue {
    pub fn new(db: Database, max_retry: u32) -> Self {
        Self {
            db,
            max_retry,
            attempt_timeout: Duration::from_secs(1200),
            lease_grace: Duration::from_secs(60),
            backoff: Duration::from_secs(5),
        }
    }

    /// Longest a consumer may spend on one delivery.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_lease_grace(mut self, grace: Duration) -> Self {
        self.lease_grace = grace;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn lease_until(&self, claimed_at: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        let held = self.attempt_timeout.saturating_add(self.lease_grace);
        claimed_at
            .checked_add_signed(to_chrono(held))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, task: &StartTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task).map_err(QueueError::Encode)?;
        let db = self.db.clone();
        let max_retry = self.max_retry;
        let id = tokio::task::spawn_blocking(move || {
            queue_repo::enqueue(&db, START_TASK_KIND, &payload, max_retry, Utc::now())
        })
        .await
        .map_err(|_| QueueError::Closed)??;
        tracing::debug!(id, rid = %task.rid, "Enqueued task");
        Ok(())
    }
}

impl TaskSource for SqliteQueue {
    fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let now = Utc::now();
        let lease = self.lease_until(now);
        let Some(row) = queue_repo::claim_next(&self.db, START_TASK_KIND, now, lease)? else {
            return Ok(None);
        };

        let task: StartTask = match serde_json::from_str(&row.payload) {
            Ok(task) => task,
            Err(source) => {
                log::error!("Burying undecodable task {}: {}", row.id, source);
                queue_repo::bury(&self.db, row.id, &source.to_string(), now)?;
                return Err(QueueError::Decode { id: row.id, source });
            }
        };
        Ok(Some(Delivery {
            id: row.id,
            task,
            attempt: row.attempts,
            max_retry: row.max_retry,
        }))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        queue_repo::complete(&self.db, delivery.id, Utc::now())?;
        Ok(())
    }

    fn retry(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        let now = Utc::now();
        if delivery.attempt > delivery.max_retry {
            log::warn!(
                "Task {} exhausted {} retries, marking dead",
                delivery.id,
                delivery.max_retry
            );
            queue_repo::bury(&self.db, delivery.id, error, now)?;
            return Ok(());
        }
        let delay = self.backoff.saturating_mul(delivery.attempt);
        queue_repo::reschedule(&self.db, delivery.id, now + to_chrono(delay), error, now)?;
        Ok(())
    }

    fn bury(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        queue_repo::bury(&self.db, delivery.id, error, Utc::now())?;
        Ok(())
    }
}
