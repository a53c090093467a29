//! Turns a submission into persisted entities plus one queued task.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::queue::TaskQueue;
use super::task::StartTask;
use crate::config::Config;
use crate::db::details_repo::NewProcessDetails;
use crate::db::process_repo::NewProcess;
use crate::db::{Database, ProcessCreator, ProcessDetailsCreator};
use crate::domain::ObjectType;
use crate::error::{QueueError, SubmitError};
use crate::pipeline::command::params_to_args;
use crate::pipeline::context::score_key;
use crate::storage::ObjectWriter;

/// A score plus its synthesis parameters, as received from a client.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub file_name: String,
    pub score: Vec<u8>,
    /// Free-form parameters; unknown keys are dropped.
    pub params: BTreeMap<String, String>,
}

pub struct SubmitterConfig {
    pub bucket: String,
    pub base_path: String,
    pub max_score_bytes: usize,
    /// Bound on how long the task may sit in the queue.
    pub max_queue_wait: Duration,
    pub enqueue_timeout: Duration,
}

impl SubmitterConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.storage.bucket.clone(),
            base_path: config.storage.base_path.clone(),
            max_score_bytes: config.worker.max_score_bytes,
            max_queue_wait: config.worker.max_queue_wait(),
            enqueue_timeout: config.worker.enqueue_timeout(),
        }
    }
}

pub struct Submitter {
    config: SubmitterConfig,
    objects: Arc<dyn ObjectWriter>,
    details_creator: Arc<dyn ProcessDetailsCreator>,
    process_creator: Arc<dyn ProcessCreator>,
    queue: Arc<dyn TaskQueue>,
}

impl Submitter {
    pub fn new(
        config: SubmitterConfig,
        objects: Arc<dyn ObjectWriter>,
        details_creator: Arc<dyn ProcessDetailsCreator>,
        process_creator: Arc<dyn ProcessCreator>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            config,
            objects,
            details_creator,
            process_creator,
            queue,
        }
    }

    pub fn with_database(
        config: SubmitterConfig,
        objects: Arc<dyn ObjectWriter>,
        db: &Database,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self::new(
            config,
            objects,
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            queue,
        )
    }

    /// Persists the job and queues its first attempt. Returns the request id.
    pub async fn submit(&self, submission: Submission) -> Result<String, SubmitError> {
        let file_name = score_file_name(&submission.file_name).ok_or(SubmitError::MissingFileName)?;
        if submission.score.is_empty() {
            return Err(SubmitError::EmptyScore);
        }
        if submission.score.len() > self.config.max_score_bytes {
            return Err(SubmitError::ScoreTooLarge {
                size: submission.score.len(),
                limit: self.config.max_score_bytes,
            });
        }

        let rid = Uuid::new_v4().to_string();
        let span = info_span!("submit", rid = %rid, file = %file_name);
        self.persist(&rid, &file_name, submission)
            .instrument(span)
            .await?;
        Ok(rid)
    }

    async fn persist(
        &self,
        rid: &str,
        file_name: &str,
        submission: Submission,
    ) -> Result<(), SubmitError> {
        let key = score_key(&self.config.base_path, rid, file_name);
        let score = self
            .objects
            .write_object(
                ObjectType::File,
                &self.config.bucket,
                &key,
                Some(Box::new(Cursor::new(submission.score))),
            )
            .await?;

        let title = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.to_string());
        let details = self
            .details_creator
            .create_details(&NewProcessDetails::new(title, score.id))?;
        let process = self
            .process_creator
            .create_process(&NewProcess::pending(rid, details.id))?;

        let task = StartTask::new(
            rid,
            params_to_args(&submission.params),
            self.config.max_queue_wait,
        );
        tokio::time::timeout(self.config.enqueue_timeout, self.queue.enqueue(&task))
            .await
            .map_err(|_| QueueError::Timeout(self.config.enqueue_timeout))??;

        info!(process_id = process.id, score_object_id = score.id, "Submitted job");
        Ok(())
    }
}

/// Last path component of a client-supplied file name.
fn score_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}
