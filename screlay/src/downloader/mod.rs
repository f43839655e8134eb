//! Download module.
//!
//! - `queue`: bounded-concurrency, bounded-backlog admission of jobs
//! - `engine`: the backend that turns a URL into a local file (yt-dlp)
//! - `resilience`: classification of failed attempts
//! - `orchestrator`: one retrieval with a degraded fallback on rate limits

pub mod engine;

mod orchestrator;
mod queue;
mod resilience;

pub use engine::{
    RetrievalEngine, RetrievalStrategy, RetrievedFile, TrackMetadata, YtDlpConfig, YtDlpEngine,
};
pub use orchestrator::{Retrieval, RetrievalOrchestrator};
pub use queue::{JobHandle, TaskQueue, TaskQueueConfig};
pub use resilience::{FailureClass, RATE_LIMIT_MARKERS, classify, is_rate_limit_text};
