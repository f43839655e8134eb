//! Turning a track URL into a delivered document.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::caption::build_caption;
use super::transport::{ChatId, ChatTransport};
use crate::downloader::{Retrieval, RetrievalOrchestrator};
use crate::messages::Notice;
use crate::quality::{QualityProbe, QualityReport};
use crate::session::ItemPipeline;
use crate::store::DurableCounter;
use crate::utils::fs::file_size;
use crate::{Error, Result};

/// A retrieved track ready to upload.
///
/// Owns the working directory of the file until delivered.
#[derive(Debug)]
pub struct PreparedTrack {
    pub retrieval: Retrieval,
    pub quality: Option<QualityReport>,
    pub size: u64,
}

/// Retrieval, size check and quality probe of one track.
pub struct TrackPipeline {
    orchestrator: Arc<RetrievalOrchestrator>,
    probe: Arc<dyn QualityProbe>,
    max_upload_bytes: u64,
}

impl TrackPipeline {
    pub fn new(
        orchestrator: Arc<RetrievalOrchestrator>,
        probe: Arc<dyn QualityProbe>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            orchestrator,
            probe,
            max_upload_bytes,
        }
    }

    pub async fn prepare_track(&self, url: &str) -> Result<PreparedTrack> {
        let retrieval = self.orchestrator.retrieve(url).await?;

        let size = match file_size(retrieval.location()).await {
            Ok(size) => size,
            Err(e) => {
                release_logged(retrieval).await;
                return Err(e);
            }
        };
        if size > self.max_upload_bytes {
            info!(url = %url, size, limit = self.max_upload_bytes, "Track exceeds upload limit");
            release_logged(retrieval).await;
            return Err(Error::user_facing(
                format!("file is {size} bytes"),
                Notice::FileTooLarge,
            ));
        }

        let quality = match self
            .probe
            .probe(retrieval.location(), retrieval.metadata())
            .await
        {
            Ok(report) => report,
            Err(e) => {
                debug!(url = %url, error = %e, "Quality probe failed");
                None
            }
        };

        Ok(PreparedTrack {
            retrieval,
            quality,
            size,
        })
    }
}

#[async_trait]
impl ItemPipeline for TrackPipeline {
    type Item = PreparedTrack;

    async fn list_entries(&self, url: &str, limit: usize) -> Vec<String> {
        self.orchestrator.engine().playlist_entries(url, limit).await
    }

    async fn prepare(&self, url: &str) -> Result<PreparedTrack> {
        self.prepare_track(url).await
    }
}

/// Upload a prepared track to `chat_id` and count it.
///
/// The working directory is released whatever the outcome.
pub async fn deliver_track(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    track: PreparedTrack,
    downloads: &DurableCounter,
) -> Result<()> {
    let PreparedTrack {
        retrieval, quality, ..
    } = track;

    if retrieval.rate_limited
        && let Err(e) = transport
            .send_text(chat_id, &Notice::PremiumRateLimited.text())
            .await
    {
        warn!(chat_id, error = %e, "Failed to send rate limit notice");
    }

    let caption = build_caption(retrieval.metadata(), quality.as_ref());
    let sent = transport
        .send_document(chat_id, retrieval.location(), retrieval.filename(), &caption)
        .await;

    if sent.is_ok() {
        if let Some(warning) = quality.as_ref().and_then(|q| q.warning.as_deref())
            && let Err(e) = transport.send_text(chat_id, warning).await
        {
            warn!(chat_id, error = %e, "Failed to send quality warning");
        }
        let total = downloads.increment();
        debug!(chat_id, filename = %retrieval.filename(), total, "Track delivered");
    }

    release_logged(retrieval).await;
    sent.map(|_| ())
}

async fn release_logged(retrieval: Retrieval) {
    if let Err(e) = retrieval.release().await {
        warn!(error = %e, "Failed to remove download directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{RetrievalEngine, RetrievalStrategy, RetrievedFile, TrackMetadata};
    use std::path::Path;

    struct FixedEngine {
        bytes: usize,
    }

    #[async_trait]
    impl RetrievalEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn attempt(&self, _url: &str, _strategy: RetrievalStrategy) -> Result<RetrievedFile> {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("song.m4a");
            std::fs::write(&path, vec![0u8; self.bytes])?;
            let metadata = TrackMetadata {
                title: Some("Song".into()),
                uploader: Some("Artist".into()),
                ..Default::default()
            };
            Ok(RetrievedFile::new(path, "song.m4a", Some(metadata), dir))
        }

        async fn playlist_entries(&self, _url: &str, limit: usize) -> Vec<String> {
            (0..limit.min(3)).map(|i| format!("https://soundcloud.com/a/{i}")).collect()
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl QualityProbe for FailingProbe {
        async fn probe(
            &self,
            _location: &Path,
            _metadata: Option<&TrackMetadata>,
        ) -> Result<Option<QualityReport>> {
            Err(Error::Other("ffprobe missing".into()))
        }
    }

    fn pipeline(bytes: usize, limit: u64) -> TrackPipeline {
        let orchestrator = Arc::new(RetrievalOrchestrator::new(Arc::new(FixedEngine { bytes })));
        TrackPipeline::new(orchestrator, Arc::new(FailingProbe), limit)
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_fatal() {
        let track = pipeline(16, 1024).prepare_track("u").await.unwrap();
        assert_eq!(track.size, 16);
        assert!(track.quality.is_none());
        let workdir = track.retrieval.file.workdir().to_path_buf();
        track.retrieval.release().await.unwrap();
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected() {
        let err = pipeline(2048, 1024).prepare_track("u").await.unwrap_err();
        match err {
            Error::UserFacing { notice, .. } => assert_eq!(notice, Notice::FileTooLarge),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_entries_come_from_engine() {
        let entries = pipeline(1, 1).list_entries("u", 2).await;
        assert_eq!(entries.len(), 2);
    }
}
