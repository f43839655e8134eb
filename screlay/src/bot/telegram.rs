//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates` and calls the Bot API methods over HTTPS. Handles
//! 429 rate limits by respecting the `parameters.retry_after` field returned
//! in the JSON response body.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::transport::{
    Button, CallbackQuery, ChatId, ChatTransport, Incoming, MessageRef, TextMessage,
};
use crate::utils::fs::{file_size, io_error};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram caption limit (UTF-8 characters).
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Server-side wait of one `getUpdates` call.
const LONG_POLL_SECS: u64 = 30;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<ApiMessage>,
    callback_query: Option<ApiCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
    chat: ApiChat,
    from: Option<ApiUser>,
    text: Option<String>,
    #[serde(default)]
    entities: Vec<ApiEntity>,
}

#[derive(Debug, Deserialize)]
struct ApiChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct ApiCallbackQuery {
    id: String,
    from: ApiUser,
    message: Option<ApiMessage>,
    data: Option<String>,
}

impl ApiMessage {
    fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

impl Update {
    fn into_incoming(self) -> Option<Incoming> {
        if let Some(message) = self.message {
            let text = message.text?;
            let is_command = message
                .entities
                .iter()
                .any(|e| e.kind == "bot_command" && e.offset == 0);
            return Some(Incoming::Text(TextMessage {
                chat_id: message.chat.id,
                user_id: message.from.as_ref().map(|u| u.id),
                username: message.from.and_then(|u| u.username),
                text,
                is_command,
            }));
        }

        let query = self.callback_query?;
        Some(Incoming::Callback(CallbackQuery {
            message: query.message.as_ref().map(ApiMessage::reference),
            id: query.id,
            user_id: query.from.id,
            data: query.data.unwrap_or_default(),
        }))
    }
}

enum Payload {
    Json(Value),
    Document {
        chat_id: ChatId,
        path: PathBuf,
        filename: String,
        caption: String,
    },
}

/// Telegram Bot API transport.
pub struct TelegramTransport {
    api_base: String,
    bot_token: String,
    client: Client,
    next_offset: AtomicI64,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>) -> Result<Self> {
        Self::with_api_base(DEFAULT_API_BASE, bot_token)
    }

    /// Point the transport at a different Bot API server.
    pub fn with_api_base(api_base: impl Into<String>, bot_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            // Per-request timeouts; uploads and long polls need more than the default.
            client: build_client(Duration::ZERO)?,
            next_offset: AtomicI64::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn build_request(
        &self,
        method: &str,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder> {
        let request = self.client.post(self.method_url(method)).timeout(timeout);
        match payload {
            Payload::Json(body) => Ok(request.json(body)),
            Payload::Document {
                chat_id,
                path,
                filename,
                caption,
            } => {
                let len = file_size(path).await?;
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| io_error("opening upload", path, e))?;
                let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                let part = Part::stream_with_length(body, len).file_name(filename.clone());
                let form = Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("caption", caption.clone())
                    .part("document", part);
                Ok(request.multipart(form))
            }
        }
    }

    /// Call a Bot API method with rate limit handling.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<T> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .build_request(method, &payload, timeout)
                .await?
                .send()
                .await?;
            let status = response.status();
            let body: ApiResponse<T> = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    return Err(Error::Telegram(format!(
                        "{method} returned {status} with an unreadable body: {e}"
                    )));
                }
            };

            if body.ok
                && let Some(result) = body.result
            {
                return Ok(result);
            }

            if status.as_u16() == 429 {
                let retry_after = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        method,
                        retry_after = ?retry_after,
                        "Telegram rate limit: max retries ({}) exceeded",
                        MAX_RATE_LIMIT_RETRIES
                    );
                    return Err(Error::Telegram(format!(
                        "{method}: rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} retries"
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    method,
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration,
                    attempts,
                    MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let description = body.description.unwrap_or_default();
            warn!(method, status = %status, description = %description, "Telegram request failed");
            return Err(Error::Telegram(format!("{method} failed: {status} - {description}")));
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn poll(&self) -> Result<Vec<Incoming>> {
        let offset = self.next_offset.load(Ordering::Acquire);
        let payload = json!({
            "offset": offset,
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message", "callback_query"],
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                Payload::Json(payload),
                Duration::from_secs(LONG_POLL_SECS) + REQUEST_TIMEOUT,
            )
            .await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_offset.store(last + 1, Ordering::Release);
        }
        Ok(updates
            .into_iter()
            .filter_map(Update::into_incoming)
            .collect())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        let message: ApiMessage = self
            .call("sendMessage", Payload::Json(payload), REQUEST_TIMEOUT)
            .await?;
        Ok(message.reference())
    }

    async fn send_prompt(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageRef> {
        let payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
            "reply_markup": { "inline_keyboard": [buttons] },
        });
        let message: ApiMessage = self
            .call("sendMessage", Payload::Json(payload), REQUEST_TIMEOUT)
            .await?;
        Ok(message.reference())
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        let _: Value = self
            .call("editMessageText", Payload::Json(payload), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        filename: &str,
        caption: &str,
    ) -> Result<MessageRef> {
        let payload = Payload::Document {
            chat_id,
            path: path.to_path_buf(),
            filename: filename.to_string(),
            caption: truncate_message(caption, TELEGRAM_CAPTION_LIMIT),
        };
        let message: ApiMessage = self.call("sendDocument", payload, UPLOAD_TIMEOUT).await?;
        debug!(chat_id, filename = %filename, "Document sent");
        Ok(message.reference())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()> {
        let payload = json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": show_alert,
        });
        let _: bool = self
            .call("answerCallbackQuery", Payload::Json(payload), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn register_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let commands: Vec<Value> = commands
            .iter()
            .map(|(command, description)| json!({ "command": command, "description": description }))
            .collect();
        let _: bool = self
            .call(
                "setMyCommands",
                Payload::Json(json!({ "commands": commands })),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }
}

/// Truncate a message to fit within the Telegram character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
