use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::details_repo::DetailsUpdate;
use crate::db::process_repo::ProcessUpdate;
use crate::db::{
    self, Database, ProcessDetailsGetter, ProcessDetailsUpdater, ProcessGetter, ProcessUpdater,
};
use crate::dispatch::task::{StartTask, START_TASK_KIND};
use crate::domain::{Object, ObjectType, Process, ProcessDetails, ProcessStatus};
use crate::error::ObjectError;
use crate::notify::{Notification, Notifier};
use crate::storage::{join_key, Blob, ObjectReader, ObjectWriter};

use super::command::{build_command, render};
use super::config::ProcessorConfig;
use super::context::{log_key, result_key, JobContext};
use super::error::{AttemptError, AttemptErrors, JobError};
use super::execute::{self, Invocation};
use super::result_dir::find_result_dir;

static RE_REQUEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Repository and storage capabilities the processor depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub process_getter: Arc<dyn ProcessGetter>,
    pub process_updater: Arc<dyn ProcessUpdater>,
    pub details_getter: Arc<dyn ProcessDetailsGetter>,
    pub details_updater: Arc<dyn ProcessDetailsUpdater>,
    pub object_reader: Arc<dyn ObjectReader>,
    pub object_writer: Arc<dyn ObjectWriter>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn from_database<O>(db: &Database, objects: Arc<O>, notifier: Arc<dyn Notifier>) -> Self
    where
        O: ObjectReader + ObjectWriter + 'static,
    {
        Self {
            process_getter: Arc::new(db.clone()),
            process_updater: Arc::new(db.clone()),
            details_getter: Arc::new(db.clone()),
            details_updater: Arc::new(db.clone()),
            object_reader: objects.clone(),
            object_writer: objects,
            notifier,
        }
    }
}

/// Outcome of an attempt that got past admission.
#[derive(Debug)]
pub struct JobReport {
    pub rid: String,
    pub status: ProcessStatus,
    pub log_object_id: Option<i64>,
    pub result_object_id: Option<i64>,
    pub errors: AttemptErrors,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.status == ProcessStatus::Succeed
    }

    /// `Err` carrying the collected failures when the attempt failed.
    pub fn into_result(self) -> Result<(), JobError> {
        self.errors.into_result()
    }
}

/// What the execute and capture phases produced.
#[derive(Debug, Default)]
struct Captured {
    log_object_id: Option<i64>,
    result_object_id: Option<i64>,
    errors: AttemptErrors,
}

pub struct Processor {
    config: Arc<ProcessorConfig>,
    deps: Collaborators,
}

impl Processor {
    pub fn new(config: Arc<ProcessorConfig>, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Runs one attempt of the job named by `task`.
    ///
    /// Fails without touching the job when it is no longer pending. A task
    /// that expired in the queue fails the job without running it. Once the
    /// job is running, the attempt always ends in `succeed` or `failed`,
    /// even when staging the input fails. The process timeout counts from
    /// the start of the attempt.
    pub async fn process(
        &self,
        task: &StartTask,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        let span = info_span!("job", rid = %task.rid);
        async {
            if !RE_REQUEST_ID.is_match(&task.rid) {
                return Err(JobError::InvalidRequestId(task.rid.clone()));
            }
            if task.is_expired(chrono::Utc::now()) {
                return self.expire(task).await;
            }

            let ctx = JobContext::create(&self.config.work_dir, &task.rid)?;
            let result = self.run(&ctx, task, cancel).await;
            if !self.config.keep_work_dir {
                ctx.remove();
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Fails a job whose task waited in the queue past its expiry, without
    /// running anything.
    async fn expire(&self, task: &StartTask) -> Result<JobReport, JobError> {
        let process = self.step_admit(&task.rid).await?;
        warn!(expired_at = %task.expires_at, "Task expired before an attempt started");

        let update = ProcessUpdate::new()
            .status(ProcessStatus::Failed)
            .completed_at(db::now())
            .when_status(ProcessStatus::Pending);
        match self.deps.process_updater.update_process(process.id, &update) {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Err(self.lost_race(process)),
            Err(e) => return Err(e.into()),
        }

        let notification = Notification::new(START_TASK_KIND, &process.request_id, false);
        if let Err(e) = self.deps.notifier.notify(&notification).await {
            warn!(error = %e, "Notification failed");
        }
        Err(JobError::Expired {
            rid: process.request_id,
            expired_at: task.expires_at,
        })
    }

    async fn run(
        &self,
        ctx: &JobContext,
        task: &StartTask,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        // Step 1: Admit
        let process = self
            .step_admit(&task.rid)
            .instrument(info_span!("admit"))
            .await?;

        // Step 2: Start
        let process = self
            .step_start(process)
            .instrument(info_span!("start"))
            .await?;

        // Steps 3-5 run under a guaranteed finalize
        let outcome = self.run_started(ctx, task, &process, cancel).await;

        // Step 6: Finalize
        let succeeded = matches!(&outcome, Ok(captured) if captured.errors.is_empty());
        let finalized = self
            .step_finalize(&process, succeeded)
            .instrument(info_span!("finalize", succeeded))
            .await;

        let captured = outcome?;
        let status = finalized?;
        Ok(JobReport {
            rid: task.rid.clone(),
            status,
            log_object_id: captured.log_object_id,
            result_object_id: captured.result_object_id,
            errors: captured.errors,
        })
    }

    async fn run_started(
        &self,
        ctx: &JobContext,
        task: &StartTask,
        process: &Process,
        cancel: &CancellationToken,
    ) -> Result<Captured, JobError> {
        // Step 3: Stage input
        let (details, score_name) = self
            .step_stage(ctx, process)
            .instrument(info_span!("stage"))
            .await
            .inspect_err(|e| error!(error = %e, "Failed to stage input"))?;

        let mut captured = Captured::default();

        // Step 4: Execute
        self.step_execute(ctx, task, &details, &score_name, cancel, &mut captured)
            .instrument(info_span!("execute"))
            .await
            .inspect_err(|e| error!(error = %e, "Failed to record command"))?;

        // Step 5: Capture artifacts
        self.step_capture(ctx, &mut captured)
            .instrument(info_span!("capture"))
            .await;

        // Step 7: Record artifact references
        self.step_record(&details, &mut captured)
            .instrument(info_span!("record"))
            .await;

        for e in captured.errors.iter() {
            warn!(error = %e, "Attempt error");
        }
        Ok(captured)
    }

    async fn step_admit(&self, rid: &str) -> Result<Process, JobError> {
        let process = self.deps.process_getter.get_process_by_request_id(rid)?;
        if process.status != ProcessStatus::Pending {
            info!(status = %process.status, "Job is not pending, skipping");
            return Err(JobError::InvalidState {
                rid: rid.to_string(),
                status: process.status,
            });
        }
        Ok(process)
    }

    async fn step_start(&self, process: Process) -> Result<Process, JobError> {
        let update = ProcessUpdate::new()
            .status(ProcessStatus::Running)
            .started_at(db::now())
            .when_status(ProcessStatus::Pending);

        match self.deps.process_updater.update_process(process.id, &update) {
            Ok(running) => {
                info!(id = running.id, "Job is running");
                Ok(running)
            }
            Err(e) if e.is_conflict() => Err(self.lost_race(process)),
            Err(e) => Err(e.into()),
        }
    }

    /// The job left `pending` between admission and the conditional update.
    fn lost_race(&self, process: Process) -> JobError {
        let status = self
            .deps
            .process_getter
            .get_process(process.id)
            .map(|p| p.status)
            .unwrap_or(ProcessStatus::Running);
        info!(status = %status, "Another attempt started the job first");
        JobError::InvalidState {
            rid: process.request_id,
            status,
        }
    }

    async fn step_stage(
        &self,
        ctx: &JobContext,
        process: &Process,
    ) -> Result<(ProcessDetails, String), JobError> {
        let details = self.deps.details_getter.get_details(process.details_id)?;
        let score = self
            .deps
            .object_reader
            .read_object(details.score_object_id)
            .await?;

        let storage = match (score.object.object_type, score.storage) {
            (ObjectType::File, Some(storage)) => storage,
            _ => {
                return Err(JobError::NotAFile {
                    object_id: details.score_object_id,
                })
            }
        };

        let score_name = file_name(&score.object.path).to_string();
        let bytes = storage
            .into_bytes()
            .map_err(|e| JobError::local_io(&ctx.score_path(&score_name), e))?;
        let score_path = ctx.stage_score(&score_name, &bytes).await?;
        debug!(path = %score_path.display(), size = bytes.len(), "Staged score");

        Ok((details, score_name))
    }

    /// Records the command, then runs it. A failed run is collected; only a
    /// failure to record the command aborts the attempt.
    async fn step_execute(
        &self,
        ctx: &JobContext,
        task: &StartTask,
        details: &ProcessDetails,
        score_name: &str,
        cancel: &CancellationToken,
        captured: &mut Captured,
    ) -> Result<(), JobError> {
        let command = build_command(
            &self.config.executable,
            ctx.rid(),
            ctx.dir(),
            &ctx.score_path(score_name),
            &self.config.extra_args,
            &task.args,
        );
        let rendered = render(&command);
        self.deps
            .details_updater
            .update_details(details.id, &DetailsUpdate::new().command(rendered.clone()))?;

        let timeout = self.config.process_timeout;
        info!(command = %rendered, timeout_secs = timeout.as_secs(), "Running executable");

        let log_path = ctx.log_path();
        let invocation = Invocation {
            command: &command,
            env: &self.config.env,
            current_dir: ctx.dir(),
            log_path: &log_path,
            timeout,
        };
        match execute::run(invocation, cancel).await {
            Ok(()) => info!("Executable finished"),
            Err(e) => {
                warn!(error = %e, "Executable failed");
                captured.errors.push(e);
            }
        }
        Ok(())
    }

    async fn step_capture(&self, ctx: &JobContext, captured: &mut Captured) {
        match self.upload_log(ctx).await {
            Ok(object) => captured.log_object_id = Some(object.id),
            Err(e) => captured.errors.push(e),
        }

        match self.upload_results(ctx, &mut captured.errors).await {
            Ok(object) => captured.result_object_id = Some(object.id),
            Err(e) => captured.errors.push(e),
        }
    }

    async fn upload_log(&self, ctx: &JobContext) -> Result<Object, AttemptError> {
        let log_path = ctx.log_path();
        let file = match std::fs::File::open(&log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AttemptError::MissingLog(log_path));
            }
            Err(source) => {
                return Err(AttemptError::ReadResult {
                    path: log_path,
                    source,
                })
            }
        };
        let key = log_key(&self.config.base_path, ctx.rid());
        self.write_file(&key, Box::new(file))
            .await
            .map_err(AttemptError::UploadLog)
    }

    /// Uploads every file of the result directory, then registers the
    /// directory itself. Per-file failures are collected into `errors`.
    async fn upload_results(
        &self,
        ctx: &JobContext,
        errors: &mut AttemptErrors,
    ) -> Result<Object, AttemptError> {
        let result_dir = find_result_dir(&ctx.result_root())?;
        debug!(dir = %result_dir.path.display(), "Found result directory");

        let prefix = result_key(&self.config.base_path, ctx.rid());
        for path in result_dir.files()? {
            let name = file_name_of(&path);
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(source) => {
                    errors.push(AttemptError::ReadResult { path, source });
                    continue;
                }
            };
            let key = join_key([prefix.as_str(), name.as_str()]);
            if let Err(source) = self.write_file(&key, Box::new(file)).await {
                errors.push(AttemptError::UploadResult { file: name, source });
            }
        }

        let dir = self
            .deps
            .object_writer
            .write_object(ObjectType::Dir, &self.config.bucket, &prefix, None)
            .await
            .map_err(AttemptError::RegisterResultDir)?;
        debug!(id = dir.id, path = %dir.path, "Registered result directory");
        Ok(dir)
    }

    async fn write_file(&self, key: &str, blob: Blob) -> Result<Object, ObjectError> {
        let object = self
            .deps
            .object_writer
            .write_object(ObjectType::File, &self.config.bucket, key, Some(blob))
            .await?;
        debug!(id = object.id, path = %object.path, size = object.size_bytes, "Uploaded object");
        Ok(object)
    }

    async fn step_record(&self, details: &ProcessDetails, captured: &mut Captured) {
        let mut update = DetailsUpdate::new();
        if let Some(id) = captured.log_object_id {
            update = update.log_object_id(id);
        }
        if let Some(id) = captured.result_object_id {
            update = update.result_object_id(id);
        }
        if update.is_empty() {
            return;
        }
        if let Err(e) = self.deps.details_updater.update_details(details.id, &update) {
            captured.errors.push(AttemptError::RecordArtifacts(e));
        }
    }

    async fn step_finalize(
        &self,
        process: &Process,
        succeeded: bool,
    ) -> Result<ProcessStatus, JobError> {
        let status = if succeeded {
            ProcessStatus::Succeed
        } else {
            ProcessStatus::Failed
        };
        let update = ProcessUpdate::new()
            .status(status)
            .completed_at(db::now())
            .when_status(ProcessStatus::Running);

        let finalized = match self.deps.process_updater.update_process(process.id, &update) {
            Ok(done) => {
                info!(status = %done.status, "Job finished");
                Ok(done.status)
            }
            Err(e) => {
                error!(error = %e, "Failed to record final status");
                Err(JobError::from(e))
            }
        };

        let notification = Notification::new(START_TASK_KIND, &process.request_id, succeeded);
        if let Err(e) = self.deps.notifier.notify(&notification).await {
            warn!(error = %e, "Notification failed");
        }

        finalized
    }
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
