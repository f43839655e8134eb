//! Failure classification for retrieval attempts.
//!
//! Upstream rate limiting of the credentialed account is the one failure
//! worth a second attempt; everything else is final.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Case-insensitive markers that identify an upstream rate limit.
pub const RATE_LIMIT_MARKERS: [&str; 4] = [
    "429",
    "too many requests",
    "rate limit",
    "temporarily blocked",
];

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Upstream limited the credentialed account; retry degraded.
    RateLimited,
    /// Propagate to the caller unchanged.
    Terminal,
}

impl FailureClass {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Whether `text` contains any rate-limit marker.
pub fn is_rate_limit_text(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Classify a failed attempt from its message and captured output.
pub fn classify(error: &Error) -> FailureClass {
    if is_rate_limit_text(&error.diagnostic_text()) {
        FailureClass::RateLimited
    } else {
        FailureClass::Terminal
    }
}
