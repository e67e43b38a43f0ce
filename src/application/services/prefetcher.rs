//! Batch cache warming.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace};

use crate::domain::entities::RequestOptions;
use crate::domain::errors::ImageError;

use super::image_manager::{CancelToken, ImageManager};

/// Default number of prefetches in flight.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 3;

/// Outcome of a prefetch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// URLs now in the cache.
    pub finished: usize,
    /// URLs that failed to load.
    pub failed: usize,
    /// URLs skipped or stopped by cancellation.
    pub cancelled: usize,
}

impl PrefetchReport {
    /// Number of URLs accounted for.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.finished + self.failed + self.cancelled
    }
}

/// Loads batches of URLs into the cache with bounded concurrency.
#[derive(Debug, Clone)]
pub struct ImagePrefetcher {
    manager: ImageManager,
    concurrency: usize,
    options: RequestOptions,
}

#[derive(Default)]
struct PrefetchState {
    cancelled: AtomicBool,
    active: Mutex<Vec<CancelToken>>,
}

/// A running prefetch batch.
pub struct PrefetchHandle {
    manager: ImageManager,
    state: Arc<PrefetchState>,
    task: JoinHandle<PrefetchReport>,
}

enum Outcome {
    Finished,
    Failed,
    Cancelled,
}

impl ImagePrefetcher {
    /// Creates a prefetcher with low-priority requests.
    #[must_use]
    pub fn new(manager: ImageManager) -> Self {
        Self {
            manager,
            concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            options: RequestOptions {
                priority: crate::domain::entities::FetchPriority::Low,
                ..RequestOptions::default()
            },
        }
    }

    /// Sets how many URLs load at once (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the options every prefetch request uses.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts loading `urls`. Must be called inside a Tokio runtime.
    pub fn prefetch(&self, urls: Vec<String>) -> PrefetchHandle {
        let state = Arc::new(PrefetchState::default());
        let task = tokio::spawn(Self::run(
            self.manager.clone(),
            self.options.clone(),
            self.concurrency,
            urls,
            state.clone(),
        ));
        PrefetchHandle {
            manager: self.manager.clone(),
            state,
            task,
        }
    }

    async fn run(
        manager: ImageManager,
        options: RequestOptions,
        concurrency: usize,
        urls: Vec<String>,
        state: Arc<PrefetchState>,
    ) -> PrefetchReport {
        let total = urls.len();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        for url in urls {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let manager = manager.clone();
            let options = options.clone();
            let state = state.clone();
            join_set.spawn(async move {
                let outcome = Self::prefetch_one(&manager, &url, options, &state).await;
                drop(permit);
                outcome
            });
        }

        let mut report = PrefetchReport::default();
        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(Outcome::Finished) => report.finished += 1,
                Ok(Outcome::Failed) | Err(_) => report.failed += 1,
                Ok(Outcome::Cancelled) => report.cancelled += 1,
            }
        }
        debug!(
            total,
            finished = report.finished,
            failed = report.failed,
            cancelled = report.cancelled,
            "Prefetch finished"
        );
        report
    }

    async fn prefetch_one(
        manager: &ImageManager,
        url: &str,
        options: RequestOptions,
        state: &PrefetchState,
    ) -> Outcome {
        let handle = {
            let mut active = state.active.lock();
            if state.cancelled.load(Ordering::SeqCst) {
                return Outcome::Cancelled;
            }
            match manager.request(url, options) {
                Ok(handle) => {
                    active.push(handle.token().clone());
                    handle
                }
                Err(e) => {
                    trace!(url, error = %e, "Prefetch rejected");
                    return Outcome::Failed;
                }
            }
        };
        let token = handle.token().clone();
        let result = handle.finished().await;
        state.active.lock().retain(|t| *t != token);
        match result {
            Ok(_) => Outcome::Finished,
            Err(ImageError::Cancelled) => Outcome::Cancelled,
            Err(e) => {
                trace!(url, error = %e, "Prefetch failed");
                Outcome::Failed
            }
        }
    }
}

impl PrefetchHandle {
    /// Stops the batch. Loads shared with other callers keep running for them.
    pub fn cancel(&self) {
        let active = {
            let mut active = self.state.active.lock();
            self.state.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut *active)
        };
        for token in &active {
            self.manager.cancel(token);
        }
    }

    /// Waits for the batch to end.
    pub async fn finished(self) -> PrefetchReport {
        self.task.await.unwrap_or_default()
    }
}
