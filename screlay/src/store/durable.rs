//! In-memory authoritative values with debounced, atomic persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::codec::{Counter, IdSet, PersistentValue};
use super::debounce::DebounceTimer;
use super::persist::write_atomic;
use crate::Result;
use crate::utils::fs::read_to_string_optional;

struct Slot<V> {
    value: V,
    dirty: bool,
}

struct StoreInner<V> {
    path: PathBuf,
    window: Duration,
    slot: Mutex<Slot<V>>,
    /// Serializes disk writes so an older snapshot never lands last.
    write_lock: tokio::sync::Mutex<()>,
    timer: DebounceTimer,
    writes: AtomicU64,
}

impl<V: PersistentValue> StoreInner<V> {
    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let payload = {
            let mut slot = self.slot.lock();
            if !slot.dirty {
                return Ok(());
            }
            slot.dirty = false;
            slot.value.encode()
        };

        let result = match payload {
            Ok(payload) => write_atomic(&self.path, payload.into_bytes()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(path = %self.path.display(), kind = V::KIND, "Persisted state");
                Ok(())
            }
            Err(e) => {
                self.slot.lock().dirty = true;
                Err(e)
            }
        }
    }
}

/// A value held in memory and persisted to one JSON file.
///
/// Mutations are synchronous and never fail. Each one marks the value dirty
/// and schedules a write after the debounce window unless one is already
/// scheduled, so a burst of mutations produces a single write of the final
/// value. A failed write is logged, the value stays dirty and the next
/// mutation or [`DurableStore::flush`] retries it.
///
/// Cloning yields another handle to the same value.
pub struct DurableStore<V> {
    inner: Arc<StoreInner<V>>,
}

impl<V> Clone for DurableStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub type DurableCounter = DurableStore<Counter>;
pub type DurableSet = DurableStore<IdSet>;

impl<V: PersistentValue> DurableStore<V> {
    /// Load the value at `path`.
    ///
    /// A missing file starts from the default value. Unreadable or
    /// malformed files are logged and also start from the default.
    pub async fn load(path: impl Into<PathBuf>, window: Duration) -> Self {
        let path = path.into();
        let value = match read_to_string_optional(&path).await {
            Ok(Some(raw)) => match V::decode(&raw) {
                Ok(value) => {
                    info!(path = %path.display(), kind = V::KIND, "Loaded persisted state");
                    value
                }
                Err(e) => {
                    warn!(path = %path.display(), kind = V::KIND, error = %e, "Ignoring malformed state file");
                    V::default()
                }
            },
            Ok(None) => {
                debug!(path = %path.display(), kind = V::KIND, "No state file; starting empty");
                V::default()
            }
            Err(e) => {
                warn!(path = %path.display(), kind = V::KIND, error = %e, "Failed to read state file");
                V::default()
            }
        };
        Self::with_value(path, window, value)
    }

    /// A store starting from `value` without reading the file.
    pub fn with_value(path: impl Into<PathBuf>, window: Duration, value: V) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                window,
                slot: Mutex::new(Slot {
                    value,
                    dirty: false,
                }),
                write_lock: tokio::sync::Mutex::new(()),
                timer: DebounceTimer::new(),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Read the current value.
    pub fn read<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.slot.lock().value)
    }

    /// Mutate the value. `f` returns whether it changed anything; only a
    /// change marks the value dirty and schedules a write.
    pub fn mutate(&self, f: impl FnOnce(&mut V) -> bool) -> bool {
        let changed = {
            let mut slot = self.inner.slot.lock();
            let changed = f(&mut slot.value);
            if changed {
                slot.dirty = true;
            }
            changed
        };
        if changed {
            self.schedule();
        }
        changed
    }

    fn schedule(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner.timer.schedule(self.inner.window, move || async move {
            if let Err(e) = inner.persist().await {
                warn!(
                    path = %inner.path.display(),
                    kind = V::KIND,
                    error = %e,
                    "Deferred state write failed; will retry"
                );
            }
        });
    }

    /// Cancel any scheduled write and persist now if dirty.
    pub async fn flush(&self) -> Result<()> {
        self.inner.timer.cancel();
        self.inner.persist().await
    }

    /// Whether in-memory state differs from the last successful write.
    pub fn is_dirty(&self) -> bool {
        self.inner.slot.lock().dirty
    }

    /// Whether a deferred write is waiting for the debounce window.
    pub fn is_flush_pending(&self) -> bool {
        self.inner.timer.is_pending()
    }

    /// Successful disk writes since construction.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl DurableStore<Counter> {
    pub fn get(&self) -> u64 {
        self.read(|c| c.0)
    }

    /// Add one and return the new value.
    pub fn increment(&self) -> u64 {
        let mut next = 0;
        self.mutate(|c| {
            c.0 = c.0.saturating_add(1);
            next = c.0;
            true
        });
        next
    }
}

impl DurableStore<IdSet> {
    /// Insert `id`; returns whether it was new.
    pub fn add(&self, id: i64) -> bool {
        self.mutate(|set| set.0.insert(id))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.read(|set| set.0.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.read(|set| set.0.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in ascending order.
    pub fn members(&self) -> Vec<i64> {
        self.read(|set| set.0.iter().copied().collect())
    }
}
