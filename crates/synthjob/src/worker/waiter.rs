use async_trait::async_trait;

/// A cancellable unit of work run by the [`WorkerPool`](super::WorkerPool).
#[async_trait]
pub trait Waiter: Send + Sync + 'static {
    type Error: Send + 'static;

    /// Runs until the work completes or observes cancellation.
    async fn wait(&self) -> Result<(), Self::Error>;

    /// Requests early termination. Must be idempotent and may be called
    /// before, during or after `wait`.
    fn cancel(&self);
}
