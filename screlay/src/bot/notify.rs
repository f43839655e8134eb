//! Error reports to the bot operators.

use std::sync::Arc;

use tracing::warn;

use super::transport::ChatTransport;
use crate::Error;
use crate::messages;
use crate::utils::text::truncate;

/// Longest error description forwarded to operators, in characters.
const MAX_REPORT_CHARS: usize = 3500;

/// Sends unexpected errors to every admin.
pub struct OperatorNotifier {
    transport: Arc<dyn ChatTransport>,
    admin_ids: Vec<i64>,
}

impl OperatorNotifier {
    pub fn new(transport: Arc<dyn ChatTransport>, admin_ids: Vec<i64>) -> Self {
        Self {
            transport,
            admin_ids,
        }
    }

    /// Report `error` unless the requester was already told about it.
    /// Delivery failures are logged only.
    pub async fn notify(&self, context: &str, error: &Error) {
        if !error.should_notify_operator() || self.admin_ids.is_empty() {
            return;
        }

        let text = messages::operator_error_notice(&describe_error(context, error));
        for &admin in &self.admin_ids {
            if let Err(e) = self.transport.send_text(admin, &text).await {
                warn!(admin, error = %e, "Failed to notify operator");
            }
        }
    }
}

/// Context line plus the error's diagnostic text, truncated.
pub fn describe_error(context: &str, error: &Error) -> String {
    truncate(
        &format!("{context}\n{}", error.diagnostic_text()),
        MAX_REPORT_CHARS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_error_truncates() {
        let err = Error::Tool {
            program: "yt-dlp".into(),
            message: "exited with 1".into(),
            stdout: String::new(),
            stderr: "x".repeat(10_000),
        };
        let text = describe_error("url: https://soundcloud.com/a/b", &err);
        assert!(text.starts_with("url: https://soundcloud.com/a/b\nyt-dlp failed"));
        assert_eq!(text.chars().count(), MAX_REPORT_CHARS);
        assert!(text.ends_with('\u{2026}'));
    }
}
