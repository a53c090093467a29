use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Job error: {0}")]
    Job(#[from] crate::pipeline::JobError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid log filter '{filter}': {reason}")]
    LogFilter { filter: String, reason: String },
}

/// Errors raised by an object store backend. Both backends map their
/// failures onto this taxonomy so callers never see backend specifics.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object '{bucket}/{path}' not found")]
    NotFound { bucket: String, path: String },

    #[error("Object '{bucket}/{path}' already exists")]
    AlreadyExists { bucket: String, path: String },

    #[error("IO error for object '{bucket}/{path}': {source}")]
    Io {
        bucket: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend error for object '{bucket}/{path}': {message}")]
    Backend {
        bucket: String,
        path: String,
        message: String,
    },

    #[error("Invalid object address '{bucket}/{path}': {reason}")]
    InvalidAddress {
        bucket: String,
        path: String,
        reason: &'static str,
    },

    #[error("Blocking storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }

    pub(crate) fn io(bucket: &str, path: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            bucket: bucket.to_string(),
            path: path.to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error(transparent)]
    Database(crate::db::DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown object type '{0}'")]
    UnknownObjectType(String),

    #[error("File object '{bucket}/{path}' written without content")]
    MissingBlob { bucket: String, path: String },
}

impl From<crate::db::DatabaseError> for ObjectError {
    fn from(err: crate::db::DatabaseError) -> Self {
        match err {
            crate::db::DatabaseError::UnknownObjectType(kind) => ObjectError::UnknownObjectType(kind),
            other => ObjectError::Database(other),
        }
    }
}

impl ObjectError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ObjectError::Database(e) => e.is_not_found(),
            ObjectError::Storage(e) => e.is_not_found(),
            ObjectError::UnknownObjectType(_) | ObjectError::MissingBlob { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode task payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode task {id}: {source}")]
    Decode {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Enqueue timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Score file name is missing")]
    MissingFileName,

    #[error("Score file is empty")]
    EmptyScore,

    #[error("Score file is {size} bytes, limit is {limit}")]
    ScoreTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("{what} not found for request '{rid}'")]
    NotFound { rid: String, what: String },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("Failed to read artifact '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to convert '{path}' to JSON: {reason}")]
    Convert { path: String, reason: String },
}

impl HistoryError {
    pub fn is_not_found(&self) -> bool {
        match self {
            HistoryError::NotFound { .. } => true,
            HistoryError::Database(e) => e.is_not_found(),
            HistoryError::Object(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook request to '{endpoint}' failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Webhook '{endpoint}' answered with status {status}")]
    Status { endpoint: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, SynthError>;
