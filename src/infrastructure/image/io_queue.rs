//! Serial background queue for blocking disk work.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs one at a time, in order, on a dedicated OS thread.
///
/// The thread exits once the queue is dropped and every queued job has run.
pub struct IoQueue {
    name: String,
    jobs: mpsc::UnboundedSender<Job>,
}

impl IoQueue {
    /// Starts the worker thread.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.clone();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(queue = %thread_name, "Disk job panicked");
                    }
                }
                trace!(queue = %thread_name, "IO queue stopped");
            })?;
        Ok(Self { name, jobs })
    }

    /// Queue name, also the worker thread's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job` without waiting for it.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            error!(queue = %self.name, "IO queue worker is gone, dropping job");
        }
    }

    /// Queues `job` and returns a receiver for its result.
    ///
    /// The receiver errors if the job panicked or the worker is gone.
    pub fn submit<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let _ = tx.send(job());
        });
        rx
    }

    /// Queues `job` and waits for its result.
    pub async fn run<T: Send + 'static>(&self, job: impl FnOnce() -> T + Send + 'static) -> Option<T> {
        self.submit(job).await.ok()
    }
}

impl std::fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoQueue").field("name", &self.name).finish()
    }
}
