//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::messages::Notice;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The task queue backlog is at capacity; nothing was enqueued.
    #[error("Download queue is full")]
    QueueFull,

    /// A queued job was dropped before producing a result (its task panicked).
    #[error("Job was aborted before completion")]
    JobAborted,

    /// An external tool ran but failed. Carries the captured output so the
    /// failure can be classified.
    #[error("{program} failed: {message}")]
    Tool {
        program: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    /// The operation completed but produced nothing usable; `notice` is the
    /// message shown to the requester.
    #[error("{message}")]
    UserFacing { message: String, notice: Notice },

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn user_facing(message: impl Into<String>, notice: Notice) -> Self {
        Self::UserFacing {
            message: message.into(),
            notice,
        }
    }

    /// All diagnostic text attached to the error: the message plus any
    /// captured stdout/stderr, newline separated.
    pub fn diagnostic_text(&self) -> String {
        match self {
            Self::Tool {
                program,
                message,
                stdout,
                stderr,
            } => [format!("{program} failed: {message}"), stdout.clone(), stderr.clone()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }

    /// Whether the operators should hear about this error. Conditions the
    /// requester has already been told about are excluded.
    pub fn should_notify_operator(&self) -> bool {
        !matches!(self, Self::UserFacing { .. } | Self::QueueFull)
    }

    /// The message to show the requester.
    pub fn user_message(&self) -> String {
        match self {
            Self::UserFacing { notice, .. } => notice.text(),
            Self::QueueFull => Notice::QueueFull.text(),
            _ => Notice::GenericError.text(),
        }
    }
}
