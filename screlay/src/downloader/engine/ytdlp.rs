//! yt-dlp retrieval engine implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::traits::{RetrievalEngine, RetrievalStrategy, RetrievedFile, TrackMetadata};
use crate::messages::Notice;
use crate::{Error, Result};

const PROGRAM: &str = "yt-dlp";

/// Format selector for the full-fidelity strategy.
pub const FULL_FIDELITY_FORMAT: &str =
    "bestaudio[ext!=opus][acodec!=opus]/http_aac_1_0/bestaudio/best";

/// Suffix of the metadata sidecar written by `--write-info-json`.
const INFO_SUFFIX: &str = ".info.json";

/// Extensions of embedded-thumbnail leftovers.
const THUMB_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Configuration for the yt-dlp engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary.
    pub binary_path: String,
    /// OAuth token sent by credentialed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_token: Option<String>,
    /// Pass `--no-check-certificates`.
    #[serde(default)]
    pub skip_cert_check: bool,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: PROGRAM.to_string(),
            oauth_token: None,
            skip_cert_check: false,
        }
    }
}

/// yt-dlp based retrieval engine.
pub struct YtDlpEngine {
    config: YtDlpConfig,
}

impl YtDlpEngine {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Detect the yt-dlp version. Blocks; call once at startup.
    pub fn detect_version(&self) -> Option<String> {
        let mut cmd = process_utils::std_command(&self.config.binary_path);
        cmd.arg("--version");
        process_utils::run_captured_std(&mut cmd)
            .ok()
            .filter(|output| output.success())
            .map(|output| output.stdout.trim().to_string())
    }

    /// Format selector for a strategy.
    pub fn format_selector(strategy: RetrievalStrategy) -> String {
        match strategy {
            RetrievalStrategy::FullFidelity => FULL_FIDELITY_FORMAT.to_string(),
            RetrievalStrategy::Degraded { max_abr_kbps } => format!(
                "bestaudio[abr<={max_abr_kbps}][acodec^=mp4a]/\
                 bestaudio[abr<={max_abr_kbps}][ext!=opus][acodec!=opus]/bestaudio"
            ),
        }
    }

    /// Build the arguments for one download attempt.
    fn build_download_args(
        &self,
        url: &str,
        strategy: RetrievalStrategy,
        output_template: &Path,
    ) -> Vec<String> {
        let mut args = vec!["-f".to_string(), Self::format_selector(strategy)];

        if strategy.is_credentialed()
            && let Some(token) = self.config.oauth_token.as_deref().filter(|t| !t.is_empty())
        {
            args.extend([
                "--add-header".to_string(),
                format!("Authorization: OAuth {token}"),
            ]);
        }

        args.extend(
            [
                "--no-playlist",
                "--retries",
                "3",
                "--no-part",
                "--quiet",
                "--add-metadata",
                "--embed-thumbnail",
                "--convert-thumbnails",
                "jpg",
                "--write-info-json",
            ]
            .map(String::from),
        );

        if self.config.skip_cert_check {
            args.push("--no-check-certificates".to_string());
        }

        args.extend([
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
        ]);
        args.push(url.to_string());
        args
    }

    fn build_playlist_args(url: &str, limit: usize) -> Vec<String> {
        vec![
            "--dump-single-json".to_string(),
            "--flat-playlist".to_string(),
            "--skip-download".to_string(),
            "--simulate".to_string(),
            "--playlist-end".to_string(),
            limit.to_string(),
            "--quiet".to_string(),
            url.to_string(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<process_utils::CapturedOutput> {
        let mut cmd = process_utils::tokio_command(&self.config.binary_path);
        cmd.args(args);

        let output = process_utils::run_captured(&mut cmd)
            .await
            .map_err(|e| Error::Tool {
                program: PROGRAM.to_string(),
                message: format!("failed to start {}: {e}", self.config.binary_path),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        if !output.success() {
            return Err(Error::Tool {
                program: PROGRAM.to_string(),
                message: output.exit_description(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl RetrievalEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        PROGRAM
    }

    async fn attempt(&self, url: &str, strategy: RetrievalStrategy) -> Result<RetrievedFile> {
        let workdir = tempfile::Builder::new()
            .prefix("sc-dl-")
            .tempdir()
            .map_err(|e| Error::io_path("creating work directory", &std::env::temp_dir(), e))?;
        let template = workdir.path().join("%(title)s.%(ext)s");
        let args = self.build_download_args(url, strategy, &template);

        debug!(url = %url, strategy = %strategy, dir = %workdir.path().display(), "Running yt-dlp");

        // Any early return drops `workdir`, which removes it.
        self.run(&args).await?;

        let picked = pick_audio_file(workdir.path()).await?;
        let metadata = match picked.info_path {
            Some(ref path) => read_metadata(path).await,
            None => None,
        };

        info!(url = %url, strategy = %strategy, file = %picked.filename, "Retrieved track");
        Ok(RetrievedFile::new(
            picked.audio_path,
            picked.filename,
            metadata,
            workdir,
        ))
    }

    async fn playlist_entries(&self, url: &str, limit: usize) -> Vec<String> {
        let args = Self::build_playlist_args(url, limit);
        match self.run(&args).await {
            Ok(output) => match parse_playlist_entries(&output.stdout, limit) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(url = %url, error = %e, "Unable to parse playlist entries");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Unable to fetch playlist entries");
                Vec::new()
            }
        }
    }
}

#[derive(Debug)]
struct PickedAudio {
    audio_path: PathBuf,
    filename: String,
    info_path: Option<PathBuf>,
}

/// Choose the audio file among the attempt's outputs.
async fn pick_audio_file(dir: &Path) -> Result<PickedAudio> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_path("listing work directory", dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("listing work directory", dir, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    if names.is_empty() {
        return Err(Error::user_facing(
            "SoundCloud returned no downloadable audio for this link",
            Notice::MissingAudio,
        ));
    }

    let mut info_path = None;
    let mut audio = None;
    for name in names {
        if name.ends_with(INFO_SUFFIX) {
            info_path = Some(dir.join(&name));
            continue;
        }
        if audio.is_none() && is_audio_candidate(&name) {
            audio = Some(name);
        }
    }

    let Some(filename) = audio else {
        return Err(Error::user_facing(
            "Download finished but no audio file was located",
            Notice::OpusOnly,
        ));
    };

    Ok(PickedAudio {
        audio_path: dir.join(&filename),
        filename,
        info_path,
    })
}

fn is_audio_candidate(name: &str) -> bool {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    ext != "opus" && !THUMB_EXTENSIONS.contains(&ext.as_str())
}

async fn read_metadata(path: &Path) -> Option<TrackMetadata> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read track metadata");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse track metadata JSON");
            None
        }
    }
}

/// Extract entry URLs from `--dump-single-json --flat-playlist` output.
fn parse_playlist_entries(stdout: &str, limit: usize) -> Result<Vec<String>> {
    let parsed: Value = serde_json::from_str(stdout.trim())?;
    Ok(parsed
        .get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .take(limit)
                .collect()
        })
        .unwrap_or_default())
}
