//! Retrieval engine abstraction.
//!
//! This module defines the `RetrievalEngine` trait and related types
//! for abstracting the backend that turns a track URL into a local file.

mod traits;
mod ytdlp;

pub use traits::{
    DEGRADED_MAX_ABR_KBPS, RetrievalEngine, RetrievalStrategy, RetrievedFile, TrackMetadata,
};
pub use ytdlp::{FULL_FIDELITY_FORMAT, YtDlpConfig, YtDlpEngine};
