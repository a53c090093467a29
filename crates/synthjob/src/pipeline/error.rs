use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::domain::ProcessStatus;
use crate::error::ObjectError;

/// Attempt-fatal errors, and the collected failures of a finished attempt.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Process '{rid}' is {status}, expected pending")]
    InvalidState { rid: String, status: ProcessStatus },

    #[error("Invalid request id '{0}'")]
    InvalidRequestId(String),

    #[error("Task for '{rid}' expired at {expired_at} before an attempt started")]
    Expired {
        rid: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("IO error for path '{path}': {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Score object {object_id} is not a file")]
    NotAFile { object_id: i64 },

    #[error("Attempt failed: {0}")]
    Attempt(AttemptErrors),
}

impl JobError {
    /// Whether redelivering the task may succeed. Only failures that can
    /// happen before the job left `pending` qualify; later deliveries are
    /// rejected by the admission guard anyway.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::InvalidState { .. }
            | JobError::InvalidRequestId(_)
            | JobError::Expired { .. }
            | JobError::NotAFile { .. }
            | JobError::Attempt(_) => false,
            JobError::Database(e) => matches!(
                e,
                DatabaseError::Sqlite(_) | DatabaseError::LockPoisoned | DatabaseError::Io { .. }
            ),
            JobError::Object(e) => !e.is_not_found(),
            JobError::LocalIo { .. } => true,
        }
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

/// Failure of the external executable.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("exited with {}", exit_description(.code))]
    Exit { code: Option<i32> },

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Result directory lookup failures.
#[derive(Error, Debug)]
pub enum ResultDirError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no result directory under '{0}'")]
    Missing(PathBuf),

    #[error("expected one result directory under '{path}', found {count}")]
    Ambiguous { path: PathBuf, count: usize },
}

/// One failure of the execute or capture phase.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("log file '{0}' was not produced")]
    MissingLog(PathBuf),

    #[error("upload log: {0}")]
    UploadLog(#[source] ObjectError),

    #[error("result directory: {0}")]
    ResultDir(#[from] ResultDirError),

    #[error("read result file '{path}': {source}")]
    ReadResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload result file '{file}': {source}")]
    UploadResult {
        file: String,
        #[source]
        source: ObjectError,
    },

    #[error("register result directory: {0}")]
    RegisterResultDir(#[source] ObjectError),

    #[error("record artifacts: {0}")]
    RecordArtifacts(#[source] DatabaseError),
}

/// Independent failures collected while an attempt carried on.
#[derive(Debug, Default)]
pub struct AttemptErrors(Vec<AttemptError>);

impl AttemptErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<AttemptError>) {
        self.0.push(error.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptError> {
        self.0.iter()
    }

    /// The execution failure, if the executable did not succeed.
    pub fn execution(&self) -> Option<&ExecutionError> {
        self.0.iter().find_map(|e| match e {
            AttemptError::Execution(inner) => Some(inner),
            _ => None,
        })
    }

    /// `Ok` when nothing was collected.
    pub fn into_result(self) -> Result<(), JobError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(JobError::Attempt(self))
        }
    }
}

impl fmt::Display for AttemptErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no errors");
        }
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AttemptErrors {}

impl IntoIterator for AttemptErrors {
    type Item = AttemptError;
    type IntoIter = std::vec::IntoIter<AttemptError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
