//! Chat front end.
//!
//! Polls the [`ChatTransport`] for messages and button presses and routes
//! them: commands, password onboarding, single tracks through the
//! [`TaskQueue`] and playlists through the [`SessionCoordinator`].

mod caption;
mod notify;
mod pipeline;
mod sink;
pub mod telegram;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::auth::{AccessGate, AuthOutcome};
use crate::downloader::{RetrievalOrchestrator, TaskQueue};
use crate::messages::{self, Notice};
use crate::quality::QualityProbe;
use crate::resolver::LinkResolver;
use crate::session::{SessionConfig, SessionCoordinator, SignalOutcome, StartOutcome};
use crate::store::DurableCounter;
use crate::utils::links::{
    extract_first_url, extract_soundcloud_url, is_soundcloud_playlist, is_supported_foreign_link,
};

pub use caption::build_caption;
pub use notify::{OperatorNotifier, describe_error};
pub use pipeline::{PreparedTrack, TrackPipeline, deliver_track};
pub use sink::{ChatSessionSink, PlaylistAction};
pub use telegram::TelegramTransport;
pub use transport::{
    Button, CallbackQuery, ChatId, ChatTransport, Incoming, MessageRef, TextMessage,
};

/// Commands advertised to the chat platform.
pub const COMMANDS: [(&str, &str); 3] = [
    ("start", "Start the bot"),
    ("downloads", "How many tracks have been downloaded"),
    ("userid", "Show your user id"),
];

/// Pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

/// Everything the bot needs, built by the caller.
pub struct BotServices {
    pub transport: Arc<dyn ChatTransport>,
    pub gate: Arc<AccessGate>,
    pub downloads: DurableCounter,
    pub queue: TaskQueue,
    pub orchestrator: Arc<RetrievalOrchestrator>,
    pub probe: Arc<dyn QualityProbe>,
    pub resolver: Arc<dyn LinkResolver>,
    pub admin_ids: Vec<i64>,
    pub session: SessionConfig,
    pub max_upload_bytes: u64,
}

struct BotInner {
    transport: Arc<dyn ChatTransport>,
    gate: Arc<AccessGate>,
    downloads: DurableCounter,
    queue: TaskQueue,
    pipeline: Arc<TrackPipeline>,
    sessions: SessionCoordinator<TrackPipeline>,
    resolver: Arc<dyn LinkResolver>,
    notifier: Arc<OperatorNotifier>,
    admin_ids: Vec<i64>,
}

/// The chat bot. Cloning yields another handle to the same bot.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn new(services: BotServices) -> Self {
        let pipeline = Arc::new(TrackPipeline::new(
            services.orchestrator,
            services.probe,
            services.max_upload_bytes,
        ));
        let sessions = SessionCoordinator::new(
            Arc::clone(&pipeline),
            services.queue.clone(),
            services.session,
        );
        let notifier = Arc::new(OperatorNotifier::new(
            Arc::clone(&services.transport),
            services.admin_ids.clone(),
        ));

        Self {
            inner: Arc::new(BotInner {
                transport: services.transport,
                gate: services.gate,
                downloads: services.downloads,
                queue: services.queue,
                pipeline,
                sessions,
                resolver: services.resolver,
                notifier,
                admin_ids: services.admin_ids,
            }),
        }
    }

    pub fn sessions(&self) -> &SessionCoordinator<TrackPipeline> {
        &self.inner.sessions
    }

    /// Poll for updates until `cancel` fires. Each update is handled on its
    /// own task.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.inner.transport.register_commands(&COMMANDS).await {
            warn!(error = %e, "Failed to register bot commands");
        }
        info!("Bot is polling for updates");

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.inner.transport.poll() => batch,
            };

            match batch {
                Ok(updates) => {
                    for update in updates {
                        let bot = self.clone();
                        tokio::spawn(async move { bot.handle(update).await });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Polling for updates failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("Bot stopped polling");
    }

    pub async fn handle(&self, update: Incoming) {
        match update {
            Incoming::Text(message) => self.handle_text(message).await,
            Incoming::Callback(query) => self.handle_callback(query).await,
        }
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.inner.transport.send_text(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    async fn notice(&self, chat_id: ChatId, notice: Notice) {
        self.reply(chat_id, &notice.text()).await;
    }

    /// Tell the requester and, when warranted, the operators.
    async fn report_failure(&self, chat_id: ChatId, context: &str, error: Error) {
        if error.should_notify_operator() {
            error!(chat_id, context = %context, error = %error, "Request failed");
        } else {
            info!(chat_id, context = %context, error = %error, "Request declined");
        }
        self.reply(chat_id, &error.user_message()).await;
        self.inner.notifier.notify(context, &error).await;
    }

    async fn handle_text(&self, message: TextMessage) {
        let chat_id = message.chat_id;
        let Some(user_id) = message.user_id else {
            self.notice(chat_id, Notice::UserIdMissing).await;
            return;
        };

        if message.is_command
            && let Some((command, args)) = parse_command(&message.text)
        {
            self.handle_command(chat_id, user_id, command, args).await;
            return;
        }

        if !self.inner.gate.is_authorized(user_id) {
            let notice = match self.inner.gate.submit(user_id, &message.text) {
                AuthOutcome::Prompted => Notice::PromptPassword,
                AuthOutcome::Accepted => Notice::PasswordAccepted,
                AuthOutcome::Rejected => Notice::PasswordRejected,
                AuthOutcome::CapacityReached => Notice::AuthLimitReached,
            };
            self.notice(chat_id, notice).await;
            return;
        }

        let Some(url) = self.soundcloud_link(chat_id, &message.text).await else {
            return;
        };

        if is_soundcloud_playlist(&url) {
            self.start_playlist(chat_id, user_id, &url).await;
        } else {
            self.fetch_single(chat_id, url).await;
        }
    }

    /// The SoundCloud link in `text`, translating a supported foreign link
    /// when needed. Replies to the user when there is none.
    async fn soundcloud_link(&self, chat_id: ChatId, text: &str) -> Option<String> {
        if let Some(url) = extract_soundcloud_url(text) {
            return Some(url);
        }

        let Some(foreign) = extract_first_url(text).filter(|u| is_supported_foreign_link(u))
        else {
            self.notice(chat_id, Notice::InvalidLink).await;
            return None;
        };

        self.notice(chat_id, Notice::ConversionInProgress).await;
        match self.inner.resolver.resolve(&foreign).await {
            Ok(Some(url)) => {
                debug!(from = %foreign, to = %url, "Resolved foreign link");
                Some(url)
            }
            Ok(None) => {
                self.notice(chat_id, Notice::ConversionNotFound).await;
                None
            }
            Err(e) => {
                self.report_failure(chat_id, &format!("resolving {foreign}"), e)
                    .await;
                None
            }
        }
    }

    async fn start_playlist(&self, chat_id: ChatId, user_id: i64, url: &str) {
        let config = self.inner.sessions.config();
        let sink = Arc::new(ChatSessionSink::new(
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.notifier),
            self.inner.downloads.clone(),
            chat_id,
            config.chunk_size,
            config.max_items,
        ));
        if let StartOutcome::NoEntries = self.inner.sessions.start(user_id, url, sink).await {
            self.notice(chat_id, Notice::PlaylistNoEntries).await;
        }
    }

    async fn fetch_single(&self, chat_id: ChatId, url: String) {
        let pipeline = Arc::clone(&self.inner.pipeline);
        let job_url = url.clone();
        let handle = match self
            .inner
            .queue
            .submit(async move { pipeline.prepare_track(&job_url).await })
        {
            Ok(handle) => handle,
            Err(e) => {
                self.report_failure(chat_id, &format!("url: {url}"), e).await;
                return;
            }
        };
        self.notice(chat_id, Notice::DownloadPrep).await;

        let delivered = match handle.await {
            Ok(track) => {
                deliver_track(
                    self.inner.transport.as_ref(),
                    chat_id,
                    track,
                    &self.inner.downloads,
                )
                .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = delivered {
            self.report_failure(chat_id, &format!("url: {url}"), e).await;
        }
    }

    async fn handle_command(&self, chat_id: ChatId, user_id: i64, command: &str, args: &str) {
        match command {
            "start" => {
                self.notice(chat_id, Notice::StartIntro).await;
                let follow_up = if self.inner.gate.is_authorized(user_id) {
                    Notice::AlreadyAuthorized
                } else {
                    match self.inner.gate.prompt(user_id) {
                        AuthOutcome::CapacityReached => Notice::AuthLimitReached,
                        _ => Notice::PromptPassword,
                    }
                };
                self.notice(chat_id, follow_up).await;
            }
            "downloads" => {
                self.reply(chat_id, &messages::download_count(self.inner.downloads.get()))
                    .await;
            }
            "userid" => {
                self.reply(chat_id, &messages::user_id_response(user_id))
                    .await;
            }
            "broadcast" => self.broadcast(chat_id, user_id, args).await,
            other => debug!(chat_id, command = %other, "Ignoring unknown command"),
        }
    }

    async fn broadcast(&self, chat_id: ChatId, user_id: i64, text: &str) {
        if !self.inner.admin_ids.contains(&user_id) {
            self.notice(chat_id, Notice::NotAdmin).await;
            return;
        }
        if text.is_empty() {
            self.notice(chat_id, Notice::BroadcastUsage).await;
            return;
        }
        let recipients = self.inner.gate.users().members();
        if recipients.is_empty() {
            self.notice(chat_id, Notice::BroadcastNoUsers).await;
            return;
        }

        let (mut sent, mut failed) = (0, 0);
        for recipient in recipients {
            match self.inner.transport.send_text(recipient, text).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(recipient, error = %e, "Broadcast delivery failed");
                }
            }
        }
        info!(sent, failed, "Broadcast finished");
        self.reply(chat_id, &messages::broadcast_result(sent, failed))
            .await;
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let sessions = &self.inner.sessions;
        let (answer, show_alert, edit) = match PlaylistAction::parse(&query.data) {
            Some(PlaylistAction::Continue(id)) => {
                match sessions.continue_session(id, query.user_id) {
                    SignalOutcome::Resumed { .. } => {
                        (Notice::Continuing.text(), false, Some(Notice::Continuing))
                    }
                    outcome => rejection(outcome),
                }
            }
            Some(PlaylistAction::Stop(id)) => match sessions.stop_session(id, query.user_id) {
                SignalOutcome::Stopped { .. } => {
                    (Notice::Stopped.text(), false, Some(Notice::PlaylistStopped))
                }
                outcome => rejection(outcome),
            },
            None => {
                debug!(data = %query.data, "Ignoring unknown callback");
                (String::new(), false, None)
            }
        };

        if let Err(e) = self
            .inner
            .transport
            .answer_callback(&query.id, &answer, show_alert)
            .await
        {
            warn!(error = %e, "Failed to answer callback");
        }
        if let (Some(notice), Some(message)) = (edit, query.message)
            && let Err(e) = self.inner.transport.edit_text(message, &notice.text()).await
        {
            warn!(error = %e, "Failed to update playlist prompt");
        }
    }
}

/// Callback answer for a signal that had no effect.
fn rejection(outcome: SignalOutcome) -> (String, bool, Option<Notice>) {
    match outcome {
        SignalOutcome::NotOwner => (Notice::NotYourPlaylist.text(), true, None),
        SignalOutcome::NotFound => (Notice::SessionExpired.text(), false, None),
        _ => (String::new(), false, None),
    }
}

/// Split `/name@bot args` into `("name", "args")`.
fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name, args.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::downloader::{
        RetrievalEngine, RetrievalStrategy, RetrievedFile, TaskQueueConfig, TrackMetadata,
    };
    use crate::quality::QualityReport;
    use crate::store::{Counter, DurableSet, IdSet};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::path::Path;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(ChatId, String),
        Prompt(ChatId, Vec<Button>),
        Edit(MessageRef, String),
        Document(ChatId, String, String),
        Answer(String, bool),
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        fn texts(&self, chat: ChatId) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|s| match s {
                    Sent::Text(c, t) if *c == chat => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn poll(&self) -> Result<Vec<Incoming>> {
            Ok(Vec::new())
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.sent.lock().push(Sent::Text(chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: 1,
            })
        }

        async fn send_prompt(
            &self,
            chat_id: ChatId,
            _text: &str,
            buttons: &[Button],
        ) -> Result<MessageRef> {
            self.sent
                .lock()
                .push(Sent::Prompt(chat_id, buttons.to_vec()));
            Ok(MessageRef {
                chat_id,
                message_id: 2,
            })
        }

        async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
            self.sent.lock().push(Sent::Edit(message, text.to_string()));
            Ok(())
        }

        async fn send_document(
            &self,
            chat_id: ChatId,
            path: &Path,
            filename: &str,
            caption: &str,
        ) -> Result<MessageRef> {
            assert!(path.exists());
            self.sent.lock().push(Sent::Document(
                chat_id,
                filename.to_string(),
                caption.to_string(),
            ));
            Ok(MessageRef {
                chat_id,
                message_id: 3,
            })
        }

        async fn answer_callback(&self, _id: &str, text: &str, show_alert: bool) -> Result<()> {
            self.sent
                .lock()
                .push(Sent::Answer(text.to_string(), show_alert));
            Ok(())
        }

        async fn register_commands(&self, _commands: &[(&str, &str)]) -> Result<()> {
            Ok(())
        }
    }

    struct FakeEngine {
        entries: usize,
    }

    #[async_trait]
    impl RetrievalEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn attempt(&self, url: &str, _strategy: RetrievalStrategy) -> Result<RetrievedFile> {
            if url.contains("broken") {
                return Err(Error::Tool {
                    program: "yt-dlp".into(),
                    message: "exited with 1".into(),
                    stdout: String::new(),
                    stderr: "ERROR: Unable to extract".into(),
                });
            }
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("track.m4a");
            std::fs::write(&path, b"audio")?;
            let metadata = TrackMetadata {
                title: Some("Track".into()),
                uploader: Some("Artist".into()),
                ..Default::default()
            };
            Ok(RetrievedFile::new(path, "track.m4a", Some(metadata), dir))
        }

        async fn playlist_entries(&self, _url: &str, limit: usize) -> Vec<String> {
            (0..self.entries.min(limit))
                .map(|i| format!("https://soundcloud.com/artist/track-{i}"))
                .collect()
        }
    }

    struct NoProbe;

    #[async_trait]
    impl QualityProbe for NoProbe {
        async fn probe(
            &self,
            _location: &Path,
            _metadata: Option<&TrackMetadata>,
        ) -> Result<Option<QualityReport>> {
            Ok(None)
        }
    }

    struct StaticResolver(Option<&'static str>);

    #[async_trait]
    impl LinkResolver for StaticResolver {
        async fn resolve(&self, _url: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    const ADMIN: i64 = 1;
    const USER: i64 = 2;
    const STRANGER: i64 = 3;

    struct Harness {
        bot: Bot,
        transport: Arc<RecordingTransport>,
        downloads: DurableCounter,
        _dir: tempfile::TempDir,
    }

    fn harness(entries: usize, resolved: Option<&'static str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let window = Duration::from_secs(60);
        let users = DurableSet::with_value(
            dir.path().join("users.json"),
            window,
            IdSet([ADMIN, USER].into_iter().collect()),
        );
        let downloads =
            DurableCounter::with_value(dir.path().join("count.json"), window, Counter(7));
        let transport = Arc::new(RecordingTransport::default());

        let bot = Bot::new(BotServices {
            transport: transport.clone(),
            gate: Arc::new(AccessGate::new(vec!["secret".into()], users)),
            downloads: downloads.clone(),
            queue: TaskQueue::new(TaskQueueConfig::default()),
            orchestrator: Arc::new(RetrievalOrchestrator::new(Arc::new(FakeEngine { entries }))),
            probe: Arc::new(NoProbe),
            resolver: Arc::new(StaticResolver(resolved)),
            admin_ids: vec![ADMIN],
            session: SessionConfig {
                chunk_size: 2,
                max_items: 10,
            },
            max_upload_bytes: 1024,
        });
        Harness {
            bot,
            transport,
            downloads,
            _dir: dir,
        }
    }

    fn text(user: i64, text: &str) -> Incoming {
        Incoming::Text(TextMessage {
            chat_id: user,
            user_id: Some(user),
            username: None,
            text: text.to_string(),
            is_command: text.starts_with('/'),
        })
    }

    fn press(user: i64, data: String) -> Incoming {
        Incoming::Callback(CallbackQuery {
            id: "cb".into(),
            user_id: user,
            message: Some(MessageRef {
                chat_id: user,
                message_id: 2,
            }),
            data,
        })
    }

    #[rstest]
    #[case("/start", Some(("start", "")))]
    #[case("/broadcast@screlay_bot hello all", Some(("broadcast", "hello all")))]
    #[case("  /userid  ", Some(("userid", "")))]
    #[case("/", None)]
    #[case("start", None)]
    fn test_parse_command(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(parse_command(input), expected);
    }

    #[tokio::test]
    async fn test_password_onboarding() {
        let h = harness(0, None);
        h.bot.handle(text(STRANGER, "https://soundcloud.com/a/b")).await;
        h.bot.handle(text(STRANGER, "nope")).await;
        h.bot.handle(text(STRANGER, "secret")).await;

        assert_eq!(
            h.transport.texts(STRANGER),
            vec![
                Notice::PromptPassword.text(),
                Notice::PasswordRejected.text(),
                Notice::PasswordAccepted.text(),
            ]
        );
    }

    #[tokio::test]
    async fn test_info_commands() {
        let h = harness(0, None);
        h.bot.handle(text(USER, "/downloads")).await;
        h.bot.handle(text(USER, "/userid")).await;
        h.bot.handle(text(USER, "/start")).await;

        assert_eq!(
            h.transport.texts(USER),
            vec![
                messages::download_count(7),
                messages::user_id_response(USER),
                Notice::StartIntro.text(),
                Notice::AlreadyAuthorized.text(),
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_requires_admin() {
        let h = harness(0, None);
        h.bot.handle(text(USER, "/broadcast hi")).await;
        assert_eq!(h.transport.texts(USER), vec![Notice::NotAdmin.text()]);

        h.bot.handle(text(ADMIN, "/broadcast")).await;
        h.bot.handle(text(ADMIN, "/broadcast hi")).await;
        assert_eq!(h.transport.texts(USER), vec![Notice::NotAdmin.text(), "hi".to_string()]);
        assert_eq!(
            h.transport.texts(ADMIN),
            vec![
                Notice::BroadcastUsage.text(),
                "hi".to_string(),
                messages::broadcast_result(2, 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_track_is_delivered_and_counted() {
        let h = harness(0, None);
        h.bot
            .handle(text(USER, "listen: https://soundcloud.com/artist/track"))
            .await;

        let sent = h.transport.sent();
        assert_eq!(
            sent,
            vec![
                Sent::Text(USER, Notice::DownloadPrep.text()),
                Sent::Document(USER, "track.m4a".into(), "Artist \u{2013} Track".into()),
            ]
        );
        assert_eq!(h.downloads.get(), 8);
    }

    #[tokio::test]
    async fn test_failed_track_notifies_user_and_operator() {
        let h = harness(0, None);
        h.bot
            .handle(text(USER, "https://soundcloud.com/artist/broken"))
            .await;

        assert_eq!(
            h.transport.texts(USER),
            vec![Notice::DownloadPrep.text(), Notice::GenericError.text()]
        );
        let operator = h.transport.texts(ADMIN);
        assert_eq!(operator.len(), 1);
        assert!(operator[0].contains("Unable to extract"));
        assert_eq!(h.downloads.get(), 7);
    }

    #[tokio::test]
    async fn test_foreign_link_resolution() {
        let h = harness(0, None);
        h.bot
            .handle(text(USER, "https://open.spotify.com/track/123"))
            .await;
        assert_eq!(
            h.transport.texts(USER),
            vec![
                Notice::ConversionInProgress.text(),
                Notice::ConversionNotFound.text(),
            ]
        );

        let h = harness(0, Some("https://soundcloud.com/artist/track"));
        h.bot
            .handle(text(USER, "https://open.spotify.com/track/123"))
            .await;
        assert_eq!(h.downloads.get(), 8);

        let h = harness(0, None);
        h.bot.handle(text(USER, "https://example.com/x")).await;
        assert_eq!(h.transport.texts(USER), vec![Notice::InvalidLink.text()]);
    }

    #[tokio::test]
    async fn test_empty_playlist() {
        let h = harness(0, None);
        h.bot
            .handle(text(USER, "https://soundcloud.com/artist/sets/mix"))
            .await;
        assert_eq!(
            h.transport.texts(USER),
            vec![Notice::PlaylistNoEntries.text()]
        );
    }

    async fn wait_for_prompt(transport: &RecordingTransport) -> Vec<Button> {
        for _ in 0..200 {
            let prompt = transport.sent().into_iter().find_map(|s| match s {
                Sent::Prompt(_, buttons) => Some(buttons),
                _ => None,
            });
            if let Some(buttons) = prompt {
                return buttons;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no playlist prompt was sent");
    }

    #[tokio::test]
    async fn test_playlist_prompt_and_stop() {
        let h = harness(3, None);
        h.bot
            .handle(text(USER, "https://soundcloud.com/artist/sets/mix"))
            .await;

        let buttons = wait_for_prompt(&h.transport).await;
        assert_eq!(buttons.len(), 2);
        let documents = h
            .transport
            .sent()
            .iter()
            .filter(|s| matches!(s, Sent::Document(..)))
            .count();
        assert_eq!(documents, 2);

        h.bot.handle(press(STRANGER, buttons[1].callback_data.clone())).await;
        assert_eq!(h.bot.sessions().active_sessions(), 1);

        h.bot.handle(press(USER, buttons[1].callback_data.clone())).await;
        assert_eq!(h.bot.sessions().active_sessions(), 0);

        h.bot.handle(press(USER, buttons[0].callback_data.clone())).await;

        let sent = h.transport.sent();
        let answers: Vec<_> = sent
            .iter()
            .filter_map(|s| match s {
                Sent::Answer(text, alert) => Some((text.clone(), *alert)),
                _ => None,
            })
            .collect();
        assert_eq!(
            answers,
            vec![
                (Notice::NotYourPlaylist.text(), true),
                (Notice::Stopped.text(), false),
                (Notice::SessionExpired.text(), false),
            ]
        );
        assert!(sent.contains(&Sent::Edit(
            MessageRef {
                chat_id: USER,
                message_id: 2
            },
            Notice::PlaylistStopped.text()
        )));
        assert_eq!(h.downloads.get(), 9);
    }
}
