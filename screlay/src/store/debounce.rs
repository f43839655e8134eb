//! Cancellable one-shot scheduled task used to debounce persistence.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending {
    id: u64,
    handle: JoinHandle<()>,
}

/// A single pending delayed task.
///
/// While a task is pending, further [`DebounceTimer::schedule`] calls are
/// ignored, so a burst of triggers collapses into one run. The slot is
/// cleared right before the task body starts: a trigger arriving while the
/// body runs schedules a fresh task.
pub struct DebounceTimer {
    slot: Arc<Mutex<Option<Pending>>>,
    next_id: AtomicU64,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `task` after `delay` unless a task is already pending.
    ///
    /// Returns `false` when a pending task absorbed this call. Must be
    /// called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                if slot.as_ref().map(|p| p.id) != Some(id) {
                    return;
                }
                // Past this point cancel() can no longer reach the task.
                *slot = None;
            }
            trace!(id, "Debounced task firing");
            task().await;
        });

        *slot = Some(Pending { id, handle });
        true
    }

    /// Cancel the pending task, if any. Returns whether one was pending.
    ///
    /// A task whose body already started is not interrupted.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a task is waiting for its delay to elapse.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
