//! Durable counters and sets.
//!
//! Values live in memory and are the source of truth; disk writes are
//! debounced and atomic. Call [`DurableStore::flush`] on shutdown.

mod codec;
mod debounce;
mod durable;
pub mod persist;

use std::time::Duration;

pub use codec::{Counter, IdSet, PersistentValue};
pub use debounce::DebounceTimer;
pub use durable::{DurableCounter, DurableSet, DurableStore};

/// Delay between the first mutation and the write that persists it.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);

/// File name of the authorized identity set inside the data directory.
pub const AUTHORIZED_USERS_FILE: &str = "authorized-users.json";

/// File name of the delivered-download counter inside the data directory.
pub const DOWNLOAD_COUNT_FILE: &str = "download-count.json";
