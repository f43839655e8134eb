//! Chat platform abstraction.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub type ChatId = i64;

/// A message the bot sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// An inline button that answers with `callback_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// A text message from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub chat_id: ChatId,
    /// `None` for anonymous senders (channel posts, anonymous admins).
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub text: String,
    /// The text starts with a bot command.
    pub is_command: bool,
}

/// A press on an inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub user_id: i64,
    /// The message carrying the button, when still accessible.
    pub message: Option<MessageRef>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(TextMessage),
    Callback(CallbackQuery),
}

/// Operations the bot needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Wait for the next batch of incoming events. May return an empty batch.
    async fn poll(&self) -> Result<Vec<Incoming>>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    /// Send `text` with one row of inline buttons.
    async fn send_prompt(&self, chat_id: ChatId, text: &str, buttons: &[Button])
    -> Result<MessageRef>;

    /// Replace the text of a sent message, dropping its buttons.
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;

    /// Upload a local file.
    async fn send_document(
        &self,
        chat_id: ChatId,
        path: &Path,
        filename: &str,
        caption: &str,
    ) -> Result<MessageRef>;

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()>;

    /// Advertise the command list. Best-effort.
    async fn register_commands(&self, commands: &[(&str, &str)]) -> Result<()>;
}
