//! Application configuration.
//!
//! Values come from the process environment (after `.env` is loaded by
//! `main`). [`AppConfig::from_lookup`] takes the lookup as a closure so
//! tests can supply their own variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::{TaskQueueConfig, YtDlpConfig};
use crate::quality::QualityConfig;
use crate::resolver::IdhsConfig;
use crate::session::SessionConfig;
use crate::store::{AUTHORIZED_USERS_FILE, DOWNLOAD_COUNT_FILE};
use crate::{Error, Result};

/// Users admitted per configured password.
pub const PASSWORD_SEGMENT_SIZE: usize = 25;

/// Largest file the chat platform accepts from bots.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub soundcloud_oauth_token: String,
    /// Access passwords, one per segment of [`PASSWORD_SEGMENT_SIZE`] users.
    pub passwords: Vec<String>,
    pub admin_ids: Vec<i64>,
    pub queue: TaskQueueConfig,
    pub session: SessionConfig,
    pub ytdlp: YtDlpConfig,
    pub idhs: IdhsConfig,
    pub quality: QualityConfig,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Never fails; call
    /// [`AppConfig::validate`] to check required values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let soundcloud_oauth_token = var("SOUNDCLOUD_OAUTH_TOKEN")
            .or_else(|| var("SOUNDCLOUD_OAUTH"))
            .unwrap_or_default();
        let passwords = var("BOT_PASSWORDS")
            .or_else(|| var("BOT_PASSWORD"))
            .map(|raw| split_passwords(&raw))
            .unwrap_or_default();
        let admin_ids = var("ADMIN_USER_IDS")
            .map(|raw| split_admin_ids(&raw))
            .unwrap_or_default();

        let queue_defaults = TaskQueueConfig::default();
        let session_defaults = SessionConfig::default();
        let idhs_defaults = IdhsConfig::default();
        let quality_defaults = QualityConfig::default();

        Self {
            bot_token: var("BOT_TOKEN").unwrap_or_default(),
            passwords,
            admin_ids,
            queue: TaskQueueConfig {
                max_concurrent: positive_or(
                    var("MAX_CONCURRENT_DOWNLOADS"),
                    queue_defaults.max_concurrent,
                ),
                max_pending: positive_or(var("MAX_PENDING_DOWNLOADS"), queue_defaults.max_pending),
            },
            session: SessionConfig {
                chunk_size: positive_or(var("PLAYLIST_CHUNK_SIZE"), session_defaults.chunk_size),
                max_items: positive_or(var("PLAYLIST_MAX_ITEMS"), session_defaults.max_items),
            },
            ytdlp: YtDlpConfig {
                binary_path: var("YT_DLP_BINARY_PATH")
                    .unwrap_or_else(|| YtDlpConfig::default().binary_path),
                oauth_token: Some(soundcloud_oauth_token.clone()).filter(|t| !t.is_empty()),
                skip_cert_check: var("YT_DLP_SKIP_CERT_CHECK").as_deref() == Some("true"),
            },
            idhs: IdhsConfig {
                base_url: var("IDHS_API_BASE_URL").unwrap_or(idhs_defaults.base_url),
                timeout: var("IDHS_REQUEST_TIMEOUT_MS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(idhs_defaults.timeout),
            },
            quality: QualityConfig {
                enabled: var("ENABLE_QUALITY_ANALYSIS").as_deref() != Some("false"),
                debug: var("QUALITY_ANALYSIS_DEBUG").as_deref() == Some("true"),
                ffprobe_path: var("FFPROBE_PATH").unwrap_or(quality_defaults.ffprobe_path),
                whatsmybitrate_path: var("WHATSMYBITRATE_PATH").map(PathBuf::from),
                python_path: quality_defaults.python_path,
            },
            soundcloud_oauth_token,
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| "data".into()),
            log_dir: var("LOG_DIR").map(PathBuf::from).unwrap_or_else(|| "logs".into()),
        }
    }

    /// Fail on the first missing required value.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.is_empty() {
            return Err(Error::config(
                "BOT_TOKEN is missing. Set it in your environment/.env file.",
            ));
        }
        if self.soundcloud_oauth_token.is_empty() {
            return Err(Error::config(
                "SOUNDCLOUD_OAUTH_TOKEN is missing. Provide the OAuth token from SoundCloud.",
            ));
        }
        if self.passwords.is_empty() {
            return Err(Error::config(
                "BOT_PASSWORDS (or BOT_PASSWORD) is missing. Set at least one password.",
            ));
        }
        Ok(())
    }

    /// Capacity of the authorized user set.
    pub fn max_authorized_users(&self) -> usize {
        self.passwords.len() * PASSWORD_SEGMENT_SIZE
    }

    pub fn authorized_users_path(&self) -> PathBuf {
        self.data_dir.join(AUTHORIZED_USERS_FILE)
    }

    pub fn download_count_path(&self) -> PathBuf {
        self.data_dir.join(DOWNLOAD_COUNT_FILE)
    }
}

fn positive_or(value: Option<String>, default: usize) -> usize {
    value
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn split_passwords(raw: &str) -> Vec<String> {
    raw.split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
