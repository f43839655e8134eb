//! Best-effort bitrate probing of retrieved files.
//!
//! The measured bitrate comes from the optional `whatsmybitrate` JSON
//! wrapper, falling back to ffprobe's container bitrate. It is compared with
//! the bitrate the source advertised in the track metadata.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::downloader::TrackMetadata;
use crate::messages;
use crate::{Error, Result};

/// Measured bitrates below this get a warning, in kbps.
pub const LOW_BITRATE_THRESHOLD_KBPS: u32 = 256;

/// Tolerance before a measured bitrate counts as a drop from the source.
const DROP_TOLERANCE_KBPS: u32 = 5;

const SOURCE_BITRATE_KEYS: [&str; 7] = [
    "abr",
    "tbr",
    "bitrate",
    "audio_bitrate",
    "audio_bitrate_kbps",
    "bit_rate",
    "vbr",
];

const REPORT_OBJECT_KEYS: [&str; 10] = [
    "kbps",
    "bitrate",
    "bitRate",
    "audioBitrate",
    "audio_bitrate",
    "bit_rate",
    "averageBitrate",
    "avgBitrate",
    "bit_rate_numeric",
    "bit_rate_numeric_kbps",
];

fn kbps_text_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*k(?:bit|b)ps").unwrap())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub enabled: bool,
    /// Log probe failures at debug level.
    pub debug: bool,
    pub ffprobe_path: String,
    /// `whatsmybitrate` JSON wrapper script, run with `python_path`.
    pub whatsmybitrate_path: Option<PathBuf>,
    pub python_path: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            ffprobe_path: "ffprobe".to_string(),
            whatsmybitrate_path: None,
            python_path: "python3".to_string(),
        }
    }
}

/// Result of probing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub measured_kbps: u32,
    pub source_kbps: Option<u32>,
    /// Text for the requester when the quality looks off.
    pub warning: Option<String>,
}

impl QualityReport {
    /// Compare a measurement with the advertised source bitrate.
    pub fn assess(measured_kbps: u32, metadata: Option<&TrackMetadata>) -> Self {
        let source_kbps = metadata.and_then(pick_source_bitrate);
        let label = metadata
            .and_then(TrackMetadata::display_label)
            .unwrap_or_else(|| "this track".to_string());

        let warning = match source_kbps {
            Some(source) if measured_kbps + DROP_TOLERANCE_KBPS < source => Some(
                messages::bitrate_drop_warning(&label, measured_kbps, source),
            ),
            _ if measured_kbps < LOW_BITRATE_THRESHOLD_KBPS => Some(messages::low_bitrate_warning(
                &label,
                measured_kbps,
                LOW_BITRATE_THRESHOLD_KBPS,
            )),
            _ => None,
        };

        Self {
            measured_kbps,
            source_kbps,
            warning,
        }
    }
}

/// Turns a file into a quality report.
#[async_trait]
pub trait QualityProbe: Send + Sync {
    /// `Ok(None)` when probing is disabled or nothing could be measured.
    async fn probe(
        &self,
        location: &Path,
        metadata: Option<&TrackMetadata>,
    ) -> Result<Option<QualityReport>>;
}

/// Probe backed by external tools.
pub struct BitrateProbe {
    config: QualityConfig,
}

impl BitrateProbe {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    async fn measure_kbps(&self, location: &Path) -> Option<u32> {
        if let Some(script) = &self.config.whatsmybitrate_path {
            match self.run_whatsmybitrate(script, location).await {
                Ok(Some(kbps)) => return Some(kbps),
                Ok(None) => self.trace("whatsmybitrate reported no bitrate"),
                Err(e) => self.trace(&format!("whatsmybitrate failed: {e}")),
            }
        }
        match self.run_ffprobe(location).await {
            Ok(kbps) => kbps,
            Err(e) => {
                self.trace(&format!("ffprobe bitrate fallback failed: {e}"));
                None
            }
        }
    }

    async fn run_whatsmybitrate(&self, script: &Path, location: &Path) -> Result<Option<u32>> {
        let mut cmd = process_utils::tokio_command(&self.config.python_path);
        cmd.arg(script).arg(location);
        let stdout = run_tool("whatsmybitrate", &mut cmd).await?;
        let Ok(report) = serde_json::from_str::<Value>(stdout.trim()) else {
            return Ok(None);
        };
        Ok(["estimated_bitrate_numeric", "estimated_bitrate", "bit_rate"]
            .iter()
            .find_map(|key| report.get(*key).and_then(extract_kbps)))
    }

    async fn run_ffprobe(&self, location: &Path) -> Result<Option<u32>> {
        let mut cmd = process_utils::tokio_command(&self.config.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=bit_rate",
            "-of",
            "default=nk=1:nw=1",
        ])
        .arg(location);
        let stdout = run_tool("ffprobe", &mut cmd).await?;
        Ok(parse_ffprobe_bitrate(&stdout))
    }

    fn trace(&self, message: &str) {
        if self.config.debug {
            debug!(target: "screlay::quality", "{message}");
        }
    }
}

#[async_trait]
impl QualityProbe for BitrateProbe {
    async fn probe(
        &self,
        location: &Path,
        metadata: Option<&TrackMetadata>,
    ) -> Result<Option<QualityReport>> {
        if !self.config.enabled {
            return Ok(None);
        }
        Ok(self
            .measure_kbps(location)
            .await
            .filter(|kbps| *kbps > 0)
            .map(|kbps| QualityReport::assess(kbps, metadata)))
    }
}

async fn run_tool(program: &str, cmd: &mut tokio::process::Command) -> Result<String> {
    let output = process_utils::run_captured(cmd)
        .await
        .map_err(|e| Error::Tool {
            program: program.to_string(),
            message: format!("failed to start: {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;
    if !output.success() {
        return Err(Error::Tool {
            program: program.to_string(),
            message: output.exit_description(),
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

fn round_kbps(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.0).then(|| value.round() as u32)
}

/// Kbps from a report field: a number, a `"320 kbps"`-style string, a
/// numeric string, or an object carrying a well-known bitrate key.
pub fn extract_kbps(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_f64().and_then(round_kbps).filter(|k| *k > 0),
        Value::String(s) => {
            if let Some(caps) = kbps_text_regex().captures(s) {
                return caps[1].parse().ok().and_then(round_kbps);
            }
            s.trim().parse().ok().and_then(round_kbps).filter(|k| *k > 0)
        }
        Value::Object(map) => REPORT_OBJECT_KEYS
            .iter()
            .find_map(|key| match map.get(*key)? {
                Value::Number(n) => n.as_f64().and_then(round_kbps),
                Value::String(s) => s.trim().parse().ok().and_then(round_kbps),
                _ => None,
            })
            .filter(|k| *k > 0),
        _ => None,
    }
}

/// First positive advertised bitrate in the metadata.
pub fn pick_source_bitrate(metadata: &TrackMetadata) -> Option<u32> {
    SOURCE_BITRATE_KEYS
        .iter()
        .filter_map(|key| metadata.number(key))
        .find(|n| n.is_finite() && *n > 0.0)
        .and_then(round_kbps)
}

/// ffprobe prints the container bitrate in bits per second.
fn parse_ffprobe_bitrate(stdout: &str) -> Option<u32> {
    let bps: f64 = stdout.trim().parse().ok()?;
    (bps.is_finite() && bps > 0.0)
        .then(|| bps / 1000.0)
        .and_then(round_kbps)
}
