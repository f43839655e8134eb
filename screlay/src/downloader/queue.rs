//! Bounded-concurrency admission queue for download jobs.
//!
//! Admission is synchronous: [`TaskQueue::submit`] either accepts the job into
//! the FIFO backlog and returns a [`JobHandle`], or fails immediately with
//! [`Error::QueueFull`]. Accepted jobs are started on the tokio runtime as
//! running slots free up, never more than `max_concurrent` at a time.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Configuration for the task queue.
#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    /// Maximum number of jobs running at once. Values below 1 are treated as 1.
    pub max_concurrent: usize,
    /// Maximum number of jobs waiting for a slot.
    pub max_pending: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_pending: 25,
        }
    }
}

struct QueuedJob {
    run: BoxFuture<'static, ()>,
    enqueued_at: Instant,
}

struct QueueState {
    active: usize,
    pending: VecDeque<QueuedJob>,
}

struct Inner {
    max_concurrent: usize,
    max_pending: usize,
    state: Mutex<QueueState>,
}

impl Inner {
    /// Start queued jobs while slots are free.
    ///
    /// The state lock is released before spawning so a job finishing on
    /// another worker can re-enter.
    fn pump(inner: &Arc<Inner>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        loop {
            let job = {
                let mut state = inner.state.lock();
                if state.active >= inner.max_concurrent {
                    return;
                }
                let Some(job) = state.pending.pop_front() else {
                    return;
                };
                state.active += 1;
                job
            };

            debug!(
                waited_ms = job.enqueued_at.elapsed().as_millis() as u64,
                "Starting queued job"
            );

            let slot = SlotGuard {
                inner: Arc::clone(inner),
            };
            runtime.spawn(async move {
                let _slot = slot;
                job.run.await;
            });
        }
    }
}

/// Frees one running slot when dropped, including when the job panics.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        Inner::pump(&self.inner);
    }
}

/// Bounded-concurrency, bounded-backlog job queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Create a new queue.
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: config.max_concurrent.max(1),
                max_pending: config.max_pending,
                state: Mutex::new(QueueState {
                    active: 0,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a unit of work.
    ///
    /// Returns [`Error::QueueFull`] without waiting when the backlog is at
    /// capacity. Otherwise the job is queued (and started right away if a
    /// slot is free) and the returned handle resolves to the job's result.
    ///
    /// Must be called from within a tokio runtime. Dropping the handle does
    /// not cancel the job.
    pub fn submit<F, T>(&self, job: F) -> Result<JobHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run: BoxFuture<'static, ()> = Box::pin(async move {
            // Receiver may be gone; the job still ran to completion.
            let _ = tx.send(job.await);
        });

        {
            let mut state = self.inner.state.lock();
            if state.pending.len() >= self.inner.max_pending {
                warn!(
                    active = state.active,
                    pending = state.pending.len(),
                    "Rejecting job: queue is full"
                );
                return Err(Error::QueueFull);
            }
            state.pending.push_back(QueuedJob {
                run,
                enqueued_at: Instant::now(),
            });
        }

        Inner::pump(&self.inner);
        Ok(JobHandle { rx })
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Number of jobs waiting for a slot.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Configured concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Configured backlog limit.
    pub fn max_pending(&self) -> usize {
        self.inner.max_pending
    }
}

/// Resolves to the result of a submitted job.
#[must_use = "a JobHandle does nothing unless awaited"]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::JobAborted)))
    }
}
