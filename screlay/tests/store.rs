//! Integration tests for debounced, atomic state persistence.

use std::time::Duration;

use screlay::store::persist::stage;
use screlay::store::{DurableCounter, DurableSet};

const WINDOW: Duration = Duration::from_millis(50);

fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_burst_of_increments_is_one_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download-count.json");
    let counter = DurableCounter::load(&path, WINDOW).await;

    for _ in 0..50 {
        counter.increment();
    }
    assert_eq!(counter.get(), 50);
    assert!(counter.is_flush_pending());

    tokio::time::sleep(WINDOW * 6).await;
    assert_eq!(counter.write_count(), 1);
    assert!(!counter.is_dirty());
    assert_eq!(read(&path).trim(), "50");
}

#[tokio::test]
async fn test_unflushed_state_is_not_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download-count.json");
    std::fs::write(&path, "7").unwrap();

    {
        let counter = DurableCounter::load(&path, Duration::from_secs(60)).await;
        assert_eq!(counter.get(), 7);
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 9);
        // Dropped before the window elapses, as in a crash.
    }

    assert_eq!(read(&path), "7");
    let reloaded = DurableCounter::load(&path, WINDOW).await;
    assert_eq!(reloaded.get(), 7);
}

#[tokio::test]
async fn test_flush_writes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download-count.json");
    let counter = DurableCounter::load(&path, Duration::from_secs(60)).await;

    for _ in 0..3 {
        counter.increment();
    }
    counter.flush().await.unwrap();

    assert!(!counter.is_flush_pending());
    assert_eq!(counter.write_count(), 1);
    assert_eq!(read(&path).trim(), "3");
}

#[tokio::test]
async fn test_set_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authorized-users.json");
    std::fs::write(&path, "[3, 1, \"2\", null]").unwrap();

    let users = DurableSet::load(&path, WINDOW).await;
    assert_eq!(users.members(), vec![1, 2, 3]);
    assert!(users.add(10));
    assert!(!users.add(10));
    users.flush().await.unwrap();

    let reloaded = DurableSet::load(&path, WINDOW).await;
    assert_eq!(reloaded.members(), vec![1, 2, 3, 10]);
}

#[test]
fn test_interrupted_write_keeps_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download-count.json");
    std::fs::write(&path, "41").unwrap();
    let before = std::fs::read(&path).unwrap();

    let staged = stage(&path, b"42").unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    assert!(temp_path.exists());
    // The process dies before the rename.
    drop(staged);

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!temp_path.exists());
}
