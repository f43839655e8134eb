//! Retrieval engine trait and related types.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;

use crate::{Error, Result};

/// Bitrate ceiling applied by the degraded strategy, in kbps.
pub const DEGRADED_MAX_ABR_KBPS: u32 = 192;

/// How a single retrieval attempt is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Authenticated, best available quality.
    FullFidelity,
    /// Unauthenticated, capped at `max_abr_kbps`.
    Degraded { max_abr_kbps: u32 },
}

impl RetrievalStrategy {
    /// The degraded strategy with the default bitrate ceiling.
    pub fn degraded() -> Self {
        Self::Degraded {
            max_abr_kbps: DEGRADED_MAX_ABR_KBPS,
        }
    }

    /// Whether the attempt should send account credentials.
    pub fn is_credentialed(&self) -> bool {
        matches!(self, Self::FullFidelity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullFidelity => "full_fidelity",
            Self::Degraded { .. } => "degraded",
        }
    }
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Track metadata as written by the engine's info sidecar.
///
/// Only the fields used for captions are typed; everything else (bitrates,
/// durations, ids) is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulltitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TrackMetadata {
    /// `artist – title`, `title`, or `None`.
    pub fn display_label(&self) -> Option<String> {
        let title = non_empty(&self.title)
            .or_else(|| non_empty(&self.fulltitle))
            .or_else(|| non_empty(&self.track));
        let artist = non_empty(&self.uploader).or_else(|| non_empty(&self.artist));
        match (artist, title) {
            (Some(artist), Some(title)) => Some(format!("{artist} \u{2013} {title}")),
            (None, Some(title)) => Some(title.to_string()),
            _ => None,
        }
    }

    /// A numeric field from `extra`, accepting JSON numbers and numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.extra.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A file produced by one successful attempt.
///
/// Owns the scoped working directory the file lives in; dropping the value
/// deletes the directory. Call [`RetrievedFile::release`] to delete it off
/// the async worker threads.
#[derive(Debug)]
pub struct RetrievedFile {
    pub location: PathBuf,
    pub filename: String,
    pub metadata: Option<TrackMetadata>,
    workdir: TempDir,
}

impl RetrievedFile {
    pub fn new(
        location: PathBuf,
        filename: impl Into<String>,
        metadata: Option<TrackMetadata>,
        workdir: TempDir,
    ) -> Self {
        Self {
            location,
            filename: filename.into(),
            metadata,
            workdir,
        }
    }

    /// Directory holding the file.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Delete the working directory.
    pub async fn release(self) -> Result<()> {
        let path = self.workdir.path().to_path_buf();
        let workdir = self.workdir;
        tokio::task::spawn_blocking(move || workdir.close())
            .await
            .map_err(|e| Error::Other(format!("cleanup task failed: {e}")))?
            .map_err(|e| Error::io_path("removing work directory", &path, e))?;
        debug!(path = %path.display(), "Released work directory");
        Ok(())
    }
}

/// A backend that turns a URL into a local file.
#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Make one attempt with the given strategy.
    ///
    /// On failure the attempt's working directory has already been removed.
    /// Failures of the underlying tool are reported as [`Error::Tool`] so the
    /// caller can inspect the captured output.
    async fn attempt(&self, url: &str, strategy: RetrievalStrategy) -> Result<RetrievedFile>;

    /// Entry URLs of a playlist, at most `limit`. Failures yield an empty list.
    async fn playlist_entries(&self, url: &str, limit: usize) -> Vec<String>;
}
