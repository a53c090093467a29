pub mod dispatcher;
pub mod local;
pub mod queue;
pub mod submit;
pub mod task;

pub use dispatcher::Dispatcher;
pub use local::LocalQueue;
pub use queue::{Delivery, SqliteQueue, TaskQueue, TaskSource};
pub use submit::{Submission, Submitter, SubmitterConfig};
pub use task::{StartTask, START_TASK_KIND};
