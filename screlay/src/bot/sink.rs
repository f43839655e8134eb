//! Chat delivery of playlist sessions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::notify::OperatorNotifier;
use super::pipeline::{PreparedTrack, deliver_track};
use super::transport::{Button, ChatId, ChatTransport};
use crate::messages::{self, Notice};
use crate::session::{SessionOutcome, SessionSink};
use crate::store::DurableCounter;
use crate::{Error, Result};

const CONTINUE_PREFIX: &str = "pl:cont:";
const STOP_PREFIX: &str = "pl:stop:";

/// Button press on a playlist prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistAction<'a> {
    Continue(&'a str),
    Stop(&'a str),
}

impl<'a> PlaylistAction<'a> {
    pub fn parse(data: &'a str) -> Option<Self> {
        if let Some(id) = data.strip_prefix(CONTINUE_PREFIX) {
            return Some(Self::Continue(id)).filter(|_| !id.is_empty());
        }
        data.strip_prefix(STOP_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::Stop)
    }

    pub fn callback_data(&self) -> String {
        match self {
            Self::Continue(id) => format!("{CONTINUE_PREFIX}{id}"),
            Self::Stop(id) => format!("{STOP_PREFIX}{id}"),
        }
    }
}

/// Sends the output of one playlist session to its chat.
pub struct ChatSessionSink {
    transport: Arc<dyn ChatTransport>,
    notifier: Arc<OperatorNotifier>,
    downloads: DurableCounter,
    chat_id: ChatId,
    chunk_size: usize,
    max_items: usize,
}

impl ChatSessionSink {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        notifier: Arc<OperatorNotifier>,
        downloads: DurableCounter,
        chat_id: ChatId,
        chunk_size: usize,
        max_items: usize,
    ) -> Self {
        Self {
            transport,
            notifier,
            downloads,
            chat_id,
            chunk_size,
            max_items,
        }
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.transport.send_text(self.chat_id, text).await {
            warn!(chat_id = self.chat_id, error = %e, "Failed to send playlist message");
        }
    }
}

#[async_trait]
impl SessionSink<PreparedTrack> for ChatSessionSink {
    async fn announce(&self, _session_id: &str, total: usize) {
        self.say(&messages::playlist_detected(total, self.chunk_size, self.max_items))
            .await;
    }

    async fn deliver(&self, _index: usize, item: PreparedTrack) -> Result<()> {
        deliver_track(self.transport.as_ref(), self.chat_id, item, &self.downloads).await
    }

    async fn item_failed(&self, index: usize, url: &str, error: &Error) {
        warn!(chat_id = self.chat_id, index, url = %url, error = %error, "Playlist item failed");
        self.say(&error.user_message()).await;
        self.notifier
            .notify(&format!("playlist item {index}: {url}"), error)
            .await;
    }

    async fn prompt(
        &self,
        session_id: &str,
        delivered: usize,
        total: usize,
    ) -> Result<Option<i64>> {
        let buttons = [
            Button::new(
                "Continue \u{25b6}",
                PlaylistAction::Continue(session_id).callback_data(),
            ),
            Button::new("Stop \u{23f9}", PlaylistAction::Stop(session_id).callback_data()),
        ];
        let text = messages::playlist_chunk_prompt(delivered, total, self.chunk_size);
        let message = self
            .transport
            .send_prompt(self.chat_id, &text, &buttons)
            .await?;
        Ok(Some(message.message_id))
    }

    async fn finished(&self, outcome: SessionOutcome) {
        let notice = match outcome {
            SessionOutcome::Completed => Notice::PlaylistDone,
            SessionOutcome::Aborted => Notice::PlaylistAborted,
        };
        self.say(&notice.text()).await;
    }
}
