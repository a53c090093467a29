pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod execute;
pub mod result_dir;
pub mod runner;

pub use config::ProcessorConfig;
pub use context::JobContext;
pub use error::{AttemptError, AttemptErrors, ExecutionError, JobError, ResultDirError};
pub use result_dir::{ResultDir, ResultElement};
pub use runner::{Collaborators, JobReport, Processor};
