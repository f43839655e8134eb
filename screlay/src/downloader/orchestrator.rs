//! Single-track retrieval with a degraded fallback on upstream rate limits.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use super::engine::{RetrievalEngine, RetrievalStrategy, RetrievedFile, TrackMetadata};
use super::resilience::classify;
use crate::Result;

/// Outcome of [`RetrievalOrchestrator::retrieve`].
///
/// Owns the file's working directory; the holder is responsible for
/// calling [`Retrieval::release`] (dropping also removes it).
#[derive(Debug)]
pub struct Retrieval {
    pub file: RetrievedFile,
    /// The file came from the degraded fallback attempt.
    pub rate_limited: bool,
}

impl Retrieval {
    pub fn location(&self) -> &Path {
        &self.file.location
    }

    pub fn filename(&self) -> &str {
        &self.file.filename
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.file.metadata.as_ref()
    }

    /// Delete the working directory.
    pub async fn release(self) -> Result<()> {
        self.file.release().await
    }
}

/// Runs one retrieval: a full-fidelity attempt, then at most one degraded
/// attempt when the first failure was an upstream rate limit.
///
/// No delay is applied between the two attempts.
pub struct RetrievalOrchestrator {
    engine: Arc<dyn RetrievalEngine>,
}

impl RetrievalOrchestrator {
    pub fn new(engine: Arc<dyn RetrievalEngine>) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn RetrievalEngine> {
        &self.engine
    }

    pub async fn retrieve(&self, url: &str) -> Result<Retrieval> {
        let error = match self
            .engine
            .attempt(url, RetrievalStrategy::FullFidelity)
            .await
        {
            Ok(file) => {
                return Ok(Retrieval {
                    file,
                    rate_limited: false,
                });
            }
            Err(e) => e,
        };

        if !classify(&error).is_recoverable() {
            debug!(url = %url, error = %error, "Retrieval failed with a terminal error");
            return Err(error);
        }

        warn!(
            url = %url,
            engine = self.engine.name(),
            "Upstream rate limit hit; retrying without credentials"
        );
        let file = self
            .engine
            .attempt(url, RetrievalStrategy::degraded())
            .await?;
        Ok(Retrieval {
            file,
            rate_limited: true,
        })
    }
}
