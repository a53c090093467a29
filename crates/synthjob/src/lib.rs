pub mod config;
pub mod db;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod history;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use dispatch::{Dispatcher, LocalQueue, SqliteQueue, StartTask, Submission, Submitter};
pub use domain::{Object, ObjectType, Process, ProcessDetails, ProcessStatus};
pub use error::{
    ConfigError, HistoryError, NotifyError, ObjectError, QueueError, Result, StorageError,
    SubmitError, SynthError,
};
pub use history::{Artifact, ArtifactKind, History, ProcessView};
pub use pipeline::{JobError, JobReport, Processor, ProcessorConfig};
pub use storage::{ObjectAdmin, ObjectStore};
