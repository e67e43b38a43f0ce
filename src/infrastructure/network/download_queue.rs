//! Priority-aware concurrency limit for downloads.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::entities::FetchPriority;

struct QueueState {
    available: usize,
    // Indexed high, normal, low.
    waiting: [VecDeque<oneshot::Sender<DownloadPermit>>; 3],
}

impl QueueState {
    const fn slot(priority: FetchPriority) -> usize {
        match priority {
            FetchPriority::High => 0,
            FetchPriority::Normal => 1,
            FetchPriority::Low => 2,
        }
    }

    fn pop_waiter(&mut self) -> Option<oneshot::Sender<DownloadPermit>> {
        self.waiting.iter_mut().find_map(VecDeque::pop_front)
    }

    fn waiting_len(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }
}

/// Hands out a fixed number of download slots.
///
/// Waiters are served high priority first, then normal, then low; FIFO
/// within a priority. A waiter that gives up is skipped.
#[derive(Clone)]
pub struct DownloadQueue {
    state: Arc<Mutex<QueueState>>,
}

/// A download slot, returned to the queue on drop.
pub struct DownloadPermit {
    state: Option<Arc<Mutex<QueueState>>>,
}

impl DownloadQueue {
    /// Creates a queue with `slots` concurrent downloads (at least one).
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                available: slots.max(1),
                waiting: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            })),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self, priority: FetchPriority) -> DownloadPermit {
        let rx = {
            let mut state = self.state.lock();
            if state.available > 0 && state.waiting_len() == 0 {
                state.available -= 1;
                return DownloadPermit {
                    state: Some(self.state.clone()),
                };
            }
            let (tx, rx) = oneshot::channel();
            state.waiting[QueueState::slot(priority)].push_back(tx);
            rx
        };
        // The sender lives in the queue until a permit is handed over.
        rx.await.unwrap_or(DownloadPermit { state: None })
    }

    /// Free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of waiters, including ones that already gave up.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting_len()
    }
}

impl std::fmt::Debug for DownloadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DownloadQueue")
            .field("available", &state.available)
            .field("waiting", &state.waiting_len())
            .finish()
    }
}

impl Drop for DownloadPermit {
    fn drop(&mut self) {
        let Some(shared) = self.state.take() else {
            return;
        };
        let mut state = shared.lock();
        while let Some(waiter) = state.pop_waiter() {
            let permit = DownloadPermit {
                state: Some(shared.clone()),
            };
            match waiter.send(permit) {
                Ok(()) => return,
                // Disarm before dropping so the lock is not re-entered.
                Err(mut unsent) => unsent.state = None,
            }
        }
        state.available += 1;
    }
}
