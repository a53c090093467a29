use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::waiter::Waiter;
use crate::dispatch::task::StartTask;
use crate::pipeline::{JobError, Processor};

/// One job attempt as a unit of pool work.
pub struct JobWaiter {
    processor: Arc<Processor>,
    task: StartTask,
    token: CancellationToken,
}

impl JobWaiter {
    pub fn new(processor: Arc<Processor>, task: StartTask) -> Self {
        Self {
            processor,
            task,
            token: CancellationToken::new(),
        }
    }

    pub fn task(&self) -> &StartTask {
        &self.task
    }
}

#[async_trait]
impl Waiter for JobWaiter {
    type Error = JobError;

    async fn wait(&self) -> Result<(), JobError> {
        self.processor
            .process(&self.task, &self.token)
            .await
            .and_then(|report| report.into_result())
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}
