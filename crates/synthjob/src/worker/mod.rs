pub mod job_waiter;
pub mod pool;
pub mod waiter;

pub use job_waiter::JobWaiter;
pub use pool::{WaitResult, WorkerPool, RESULT_BUFFER};
pub use waiter::Waiter;
