//! Playlist session state.

/// Pagination settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Items delivered between confirmation prompts. Values below 1 are treated as 1.
    pub chunk_size: usize,
    /// Maximum number of entries taken from one playlist.
    pub max_items: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_items: 100,
        }
    }
}

/// Where a live session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Items are being scheduled.
    Streaming,
    /// A chunk boundary was reached; waiting for in-flight items to settle
    /// before prompting.
    Draining,
    /// Prompt sent; scheduling suspended until the owner answers.
    AwaitingConfirmation,
}

/// How a session left the registry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every item was scheduled and every result reported.
    Completed,
    /// The queue refused an item or the prompt could not be sent; nothing
    /// further was scheduled.
    Aborted,
}

/// Result of a continue/stop signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Scheduling resumed. Carries the prompt that was answered.
    Resumed { prompt: Option<i64> },
    /// The session was discarded along with `discarded` undelivered results.
    Stopped {
        prompt: Option<i64>,
        discarded: usize,
    },
    /// No live session with that id.
    NotFound,
    /// The signal came from someone other than the owner; nothing changed.
    NotOwner,
    /// Continue arrived while no prompt was outstanding.
    NotAwaiting,
}

/// Result of starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { session_id: String, total: usize },
    /// The playlist listed no entries; no session was created.
    NoEntries,
}

/// The bookkeeping of one playlist.
#[derive(Debug, Clone)]
pub struct PlaylistSession {
    pub id: String,
    pub owner: i64,
    /// Entry URLs, fixed at creation.
    pub urls: Vec<String>,
    /// Index of the next entry to schedule. Never decreases.
    pub cursor: usize,
    /// Cursor value at the last answered prompt.
    pub confirmed_at: usize,
    pub phase: SessionPhase,
    /// Message id of the last prompt sent, if the transport returned one.
    pub last_prompt: Option<i64>,
}

impl PlaylistSession {
    pub fn new(id: String, owner: i64, urls: Vec<String>) -> Self {
        Self {
            id,
            owner,
            urls,
            cursor: 0,
            confirmed_at: 0,
            phase: SessionPhase::Streaming,
            last_prompt: None,
        }
    }

    pub fn total(&self) -> usize {
        self.urls.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.urls.len()
    }

    /// Whether the cursor sits on a chunk boundary that has not been
    /// confirmed yet.
    pub fn at_unconfirmed_boundary(&self, chunk_size: usize) -> bool {
        self.cursor > 0
            && self.cursor % chunk_size.max(1) == 0
            && self.cursor != self.confirmed_at
    }
}

/// Read-only view of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub owner: i64,
    pub total: usize,
    pub cursor: usize,
    pub phase: SessionPhase,
    pub in_flight: usize,
    pub buffered: usize,
}
