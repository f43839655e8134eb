//! Integration tests for the bounded task queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use screlay::Error;
use screlay::downloader::{TaskQueue, TaskQueueConfig};
use tokio::sync::oneshot;

/// Tracks how many jobs run at once.
#[derive(Default)]
struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_concurrency_limit_holds_extra_job_back() {
    let queue = TaskQueue::new(TaskQueueConfig {
        max_concurrent: 2,
        max_pending: 10,
    });
    let gauge = Arc::new(Gauge::default());
    let started = Arc::new(AtomicUsize::new(0));

    let mut releases = Vec::new();
    let mut handles = Vec::new();
    for i in 0..3 {
        let (tx, rx) = oneshot::channel::<()>();
        releases.push(tx);
        let gauge = gauge.clone();
        let started = started.clone();
        handles.push(
            queue
                .submit(async move {
                    gauge.enter();
                    started.fetch_add(1, Ordering::SeqCst);
                    let _ = rx.await;
                    gauge.exit();
                    Ok(i)
                })
                .unwrap(),
        );
    }

    settle().await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(queue.active_count(), 2);
    assert_eq!(queue.pending_count(), 1);

    // Freeing one slot lets the third job in.
    releases.remove(0).send(()).unwrap();
    settle().await;
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(queue.pending_count(), 0);

    for tx in releases {
        tx.send(()).unwrap();
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert_eq!(results, vec![0, 1, 2]);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_full_backlog_rejects_immediately() {
    let queue = TaskQueue::new(TaskQueueConfig {
        max_concurrent: 1,
        max_pending: 2,
    });
    let (tx, rx) = oneshot::channel::<()>();

    let running = queue
        .submit(async move {
            let _ = rx.await;
            Ok(())
        })
        .unwrap();
    let backlog: Vec<_> = (0..2)
        .map(|_| queue.submit(async { Ok(()) }).unwrap())
        .collect();
    assert_eq!(queue.pending_count(), 2);

    match queue.submit(async { Ok(()) }) {
        Err(Error::QueueFull) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("submission beyond the backlog was accepted"),
    }
    assert_eq!(queue.pending_count(), 2);

    tx.send(()).unwrap();
    running.await.unwrap();
    for handle in backlog {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_failures_do_not_leak_slots() {
    let queue = TaskQueue::new(TaskQueueConfig {
        max_concurrent: 2,
        max_pending: 20,
    });

    let handles: Vec<_> = (0..10)
        .map(|i| {
            queue
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    if i % 2 == 0 {
                        Err(Error::Other(format!("job {i} failed")))
                    } else {
                        Ok(i)
                    }
                })
                .unwrap()
        })
        .collect();

    let mut failures = 0;
    for handle in handles {
        if handle.await.is_err() {
            failures += 1;
        }
    }
    assert_eq!(failures, 5);

    settle().await;
    assert_eq!(queue.active_count(), 0);
    assert_eq!(queue.pending_count(), 0);
}
