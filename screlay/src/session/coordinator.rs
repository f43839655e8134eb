//! Drives playlist sessions through the task queue in confirmed chunks.
//!
//! A session keeps at most `max_concurrent` of its items in the
//! [`TaskQueue`] at once and submits the next one as each settles, so it
//! never competes with itself for backlog room. Results are reported to the
//! session's sink in completion order. Once the cursor reaches a chunk boundary no
//! further items are scheduled; when the in-flight items have settled the
//! owner is prompted and scheduling resumes only on their "continue".

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{
    PlaylistSession, SessionConfig, SessionOutcome, SessionPhase, SessionSnapshot, SignalOutcome,
    StartOutcome,
};
use crate::downloader::{JobHandle, TaskQueue};
use crate::{Error, Result};

/// Produces session items.
#[async_trait]
pub trait ItemPipeline: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Entry URLs of the playlist at `url`, at most `limit`.
    async fn list_entries(&self, url: &str, limit: usize) -> Vec<String>;

    /// Turn one entry into a deliverable item. Runs inside a queue slot.
    async fn prepare(&self, url: &str) -> Result<Self::Item>;
}

/// Receives the output of one session.
#[async_trait]
pub trait SessionSink<I>: Send + Sync {
    /// The session was created with `total` entries. Called before any item
    /// is scheduled.
    async fn announce(&self, session_id: &str, total: usize);

    async fn deliver(&self, index: usize, item: I) -> Result<()>;

    /// One entry failed; the session carries on.
    async fn item_failed(&self, index: usize, url: &str, error: &Error);

    /// Ask the owner whether to continue. Returns a reference to the prompt
    /// message, if the transport provides one. An error aborts the session,
    /// since nobody could answer the prompt.
    async fn prompt(
        &self,
        session_id: &str,
        delivered: usize,
        total: usize,
    ) -> Result<Option<i64>>;

    async fn finished(&self, outcome: SessionOutcome);
}

enum Settled<I> {
    Ready(I),
    Failed { url: String, error: Error },
}

struct SessionEntry<I> {
    session: PlaylistSession,
    sink: Arc<dyn SessionSink<I>>,
    /// Completed results not reported yet, in completion order.
    buffer: VecDeque<(usize, Settled<I>)>,
    in_flight: usize,
    /// Held while reporting so deliveries of one session never interleave.
    report_lock: Arc<tokio::sync::Mutex<()>>,
}

enum Step<I> {
    Idle,
    Prompt {
        sink: Arc<dyn SessionSink<I>>,
        delivered: usize,
        total: usize,
    },
    Finished {
        sink: Arc<dyn SessionSink<I>>,
        outcome: SessionOutcome,
    },
}

struct CoordinatorInner<P: ItemPipeline> {
    pipeline: Arc<P>,
    queue: TaskQueue,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, SessionEntry<P::Item>>>,
}

/// Registry and scheduler of playlist sessions.
///
/// Cloning yields another handle to the same registry.
pub struct SessionCoordinator<P: ItemPipeline> {
    inner: Arc<CoordinatorInner<P>>,
}

impl<P: ItemPipeline> Clone for SessionCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ItemPipeline> SessionCoordinator<P> {
    pub fn new(pipeline: Arc<P>, queue: TaskQueue, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                pipeline,
                queue,
                config: SessionConfig {
                    chunk_size: config.chunk_size.max(1),
                    max_items: config.max_items,
                },
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// List the playlist and, if it has entries, register a session and
    /// schedule its first chunk.
    pub async fn start(
        &self,
        owner: i64,
        url: &str,
        sink: Arc<dyn SessionSink<P::Item>>,
    ) -> StartOutcome {
        let max_items = self.inner.config.max_items;
        let mut urls = self.inner.pipeline.list_entries(url, max_items).await;
        urls.truncate(max_items);
        if urls.is_empty() {
            info!(url = %url, owner, "Playlist has no entries");
            return StartOutcome::NoEntries;
        }

        let session_id = format!("{owner}-{}", Uuid::new_v4().simple());
        let total = urls.len();
        info!(session_id = %session_id, owner, total, url = %url, "Starting playlist session");

        sink.announce(&session_id, total).await;

        {
            let mut sessions = self.inner.sessions.lock();
            sessions.insert(
                session_id.clone(),
                SessionEntry {
                    session: PlaylistSession::new(session_id.clone(), owner, urls),
                    sink,
                    buffer: VecDeque::new(),
                    in_flight: 0,
                    report_lock: Arc::new(tokio::sync::Mutex::new(())),
                },
            );
        }

        self.inner.drive(&session_id).await;
        StartOutcome::Started { session_id, total }
    }

    /// Resume a session waiting at a prompt. Only its owner may do so.
    pub fn continue_session(&self, session_id: &str, requester: i64) -> SignalOutcome {
        let prompt = {
            let mut sessions = self.inner.sessions.lock();
            let Some(entry) = sessions.get_mut(session_id) else {
                return SignalOutcome::NotFound;
            };
            if entry.session.owner != requester {
                warn!(session_id = %session_id, requester, "Ignoring continue from non-owner");
                return SignalOutcome::NotOwner;
            }
            if entry.session.phase != SessionPhase::AwaitingConfirmation {
                return SignalOutcome::NotAwaiting;
            }
            entry.session.phase = SessionPhase::Streaming;
            entry.session.confirmed_at = entry.session.cursor;
            entry.session.last_prompt.take()
        };

        debug!(session_id = %session_id, "Playlist session resumed");
        let inner = Arc::clone(&self.inner);
        let id = session_id.to_string();
        tokio::spawn(async move {
            inner.drive(&id).await;
        });
        SignalOutcome::Resumed { prompt }
    }

    /// Discard a session. Jobs already submitted keep running but their
    /// results are dropped, as are buffered results.
    pub fn stop_session(&self, session_id: &str, requester: i64) -> SignalOutcome {
        let mut sessions = self.inner.sessions.lock();
        match sessions.get(session_id) {
            None => return SignalOutcome::NotFound,
            Some(entry) if entry.session.owner != requester => {
                warn!(session_id = %session_id, requester, "Ignoring stop from non-owner");
                return SignalOutcome::NotOwner;
            }
            Some(_) => {}
        }
        let Some(entry) = sessions.remove(session_id) else {
            return SignalOutcome::NotFound;
        };
        info!(
            session_id = %session_id,
            cursor = entry.session.cursor,
            total = entry.session.total(),
            "Playlist session stopped"
        );
        SignalOutcome::Stopped {
            prompt: entry.session.last_prompt,
            discarded: entry.buffer.len(),
        }
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let sessions = self.inner.sessions.lock();
        sessions.get(session_id).map(|entry| SessionSnapshot {
            owner: entry.session.owner,
            total: entry.session.total(),
            cursor: entry.session.cursor,
            phase: entry.session.phase,
            in_flight: entry.in_flight,
            buffered: entry.buffer.len(),
        })
    }
}

impl<P: ItemPipeline> CoordinatorInner<P> {
    /// Report buffered results, schedule what the phase allows, then act on
    /// the resulting step. Serialized per session by the report lock.
    async fn drive(self: &Arc<Self>, id: &str) {
        let Some(report_lock) = self
            .sessions
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.report_lock))
        else {
            return;
        };
        let _guard = report_lock.lock().await;

        self.report_buffered(id).await;

        match self.schedule(id) {
            Step::Idle => {}
            Step::Prompt {
                sink,
                delivered,
                total,
            } => {
                info!(session_id = %id, delivered, total, "Awaiting confirmation");
                match sink.prompt(id, delivered, total).await {
                    Ok(prompt) => {
                        if let Some(entry) = self.sessions.lock().get_mut(id) {
                            entry.session.last_prompt = prompt;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "Aborting playlist session: prompt not sent");
                        let removed = self.sessions.lock().remove(id).is_some();
                        if removed {
                            sink.finished(SessionOutcome::Aborted).await;
                        }
                    }
                }
            }
            Step::Finished { sink, outcome } => {
                sink.finished(outcome).await;
            }
        }
    }

    async fn report_buffered(&self, id: &str) {
        loop {
            let next = {
                let mut sessions = self.sessions.lock();
                let Some(entry) = sessions.get_mut(id) else {
                    return;
                };
                entry
                    .buffer
                    .pop_front()
                    .map(|settled| (Arc::clone(&entry.sink), settled))
            };
            let Some((sink, (index, settled))) = next else {
                return;
            };

            match settled {
                Settled::Ready(item) => {
                    if let Err(e) = sink.deliver(index, item).await {
                        warn!(session_id = %id, index, error = %e, "Failed to deliver playlist item");
                    }
                }
                Settled::Failed { url, error } => {
                    sink.item_failed(index, &url, &error).await;
                }
            }
        }
    }

    /// Submit items until the in-flight window is full, a chunk boundary is
    /// reached or the entries run out, then decide whether the session
    /// should prompt, finish or wait.
    fn schedule(self: &Arc<Self>, id: &str) -> Step<P::Item> {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(id) else {
            return Step::Idle;
        };

        let window = self.queue.max_concurrent();
        while entry.session.phase == SessionPhase::Streaming
            && !entry.session.is_exhausted()
            && entry.in_flight < window
        {
            if entry
                .session
                .at_unconfirmed_boundary(self.config.chunk_size)
            {
                entry.session.phase = SessionPhase::Draining;
                break;
            }

            let index = entry.session.cursor;
            let url = entry.session.urls[index].clone();
            match self.submit_item(&url) {
                Ok(handle) => {
                    entry.session.cursor += 1;
                    entry.in_flight += 1;
                    self.await_settlement(id, index, url, handle);
                }
                Err(e) => {
                    warn!(
                        session_id = %id,
                        index,
                        error = %e,
                        "Aborting playlist session: could not schedule next item"
                    );
                    let sink = Arc::clone(&entry.sink);
                    sessions.remove(id);
                    return Step::Finished {
                        sink,
                        outcome: SessionOutcome::Aborted,
                    };
                }
            }
        }

        if entry.in_flight > 0 || !entry.buffer.is_empty() {
            return Step::Idle;
        }

        if entry.session.phase == SessionPhase::Draining {
            entry.session.phase = SessionPhase::AwaitingConfirmation;
            return Step::Prompt {
                sink: Arc::clone(&entry.sink),
                delivered: entry.session.cursor,
                total: entry.session.total(),
            };
        }

        if entry.session.phase == SessionPhase::Streaming && entry.session.is_exhausted() {
            let sink = Arc::clone(&entry.sink);
            info!(session_id = %id, total = entry.session.total(), "Playlist session completed");
            sessions.remove(id);
            return Step::Finished {
                sink,
                outcome: SessionOutcome::Completed,
            };
        }

        Step::Idle
    }

    fn submit_item(&self, url: &str) -> Result<JobHandle<P::Item>> {
        let pipeline = Arc::clone(&self.pipeline);
        let url = url.to_string();
        self.queue
            .submit(async move { pipeline.prepare(&url).await })
    }

    fn await_settlement(
        self: &Arc<Self>,
        id: &str,
        index: usize,
        url: String,
        handle: JobHandle<P::Item>,
    ) {
        let inner = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            let result = handle.await;
            inner.settle(&id, index, url, result).await;
        });
    }

    async fn settle(self: &Arc<Self>, id: &str, index: usize, url: String, result: Result<P::Item>) {
        {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(id) else {
                debug!(session_id = %id, index, "Dropping result of a closed session");
                return;
            };
            entry.in_flight = entry.in_flight.saturating_sub(1);
            let settled = match result {
                Ok(item) => Settled::Ready(item),
                Err(error) => {
                    warn!(session_id = %id, index, url = %url, error = %error, "Playlist item failed");
                    Settled::Failed { url, error }
                }
            };
            entry.buffer.push_back((index, settled));
        }
        self.drive(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::TaskQueueConfig;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakePipeline {
        entries: Vec<String>,
        delays: HashMap<String, Duration>,
        failing: HashSet<String>,
        prepared: Mutex<Vec<String>>,
    }

    impl FakePipeline {
        fn with_entries(count: usize) -> Self {
            Self {
                entries: (0..count).map(|i| format!("u{i}")).collect(),
                delays: HashMap::new(),
                failing: HashSet::new(),
                prepared: Mutex::new(Vec::new()),
            }
        }

        fn prepared(&self) -> Vec<String> {
            self.prepared.lock().clone()
        }
    }

    #[async_trait]
    impl ItemPipeline for FakePipeline {
        type Item = String;

        async fn list_entries(&self, _url: &str, limit: usize) -> Vec<String> {
            self.entries.iter().take(limit).cloned().collect()
        }

        async fn prepare(&self, url: &str) -> Result<String> {
            self.prepared.lock().push(url.to_string());
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(url) {
                return Err(Error::Other(format!("{url} unavailable")));
            }
            Ok(url.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Announced(usize),
        Delivered(usize),
        Failed(usize),
        Prompt { delivered: usize, total: usize },
        Finished(SessionOutcome),
    }

    struct RecordingSink {
        tx: mpsc::UnboundedSender<Event>,
        prompt_fails: bool,
    }

    #[async_trait]
    impl SessionSink<String> for RecordingSink {
        async fn announce(&self, _session_id: &str, total: usize) {
            let _ = self.tx.send(Event::Announced(total));
        }

        async fn deliver(&self, index: usize, _item: String) -> Result<()> {
            let _ = self.tx.send(Event::Delivered(index));
            Ok(())
        }

        async fn item_failed(&self, index: usize, _url: &str, _error: &Error) {
            let _ = self.tx.send(Event::Failed(index));
        }

        async fn prompt(
            &self,
            _session_id: &str,
            delivered: usize,
            total: usize,
        ) -> Result<Option<i64>> {
            let _ = self.tx.send(Event::Prompt { delivered, total });
            if self.prompt_fails {
                return Err(Error::Telegram("chat not found".into()));
            }
            Ok(Some(delivered as i64))
        }

        async fn finished(&self, outcome: SessionOutcome) {
            let _ = self.tx.send(Event::Finished(outcome));
        }
    }

    fn sink() -> (Arc<RecordingSink>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(RecordingSink {
                tx,
                prompt_fails: false,
            }),
            rx,
        )
    }

    fn coordinator(
        pipeline: Arc<FakePipeline>,
        max_concurrent: usize,
        max_pending: usize,
    ) -> SessionCoordinator<FakePipeline> {
        SessionCoordinator::new(
            pipeline,
            TaskQueue::new(TaskQueueConfig {
                max_concurrent,
                max_pending,
            }),
            SessionConfig {
                chunk_size: 10,
                max_items: 100,
            },
        )
    }

    /// Collect events until one matches `stop`.
    async fn collect_until(
        rx: &mut mpsc::UnboundedReceiver<Event>,
        stop: impl Fn(&Event) -> bool,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("sink dropped");
            let done = stop(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn session_id(outcome: StartOutcome) -> String {
        match outcome {
            StartOutcome::Started { session_id, .. } => session_id,
            other => panic!("expected a started session, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_playlist_creates_no_session() {
        let pipeline = Arc::new(FakePipeline::with_entries(0));
        let coordinator = coordinator(pipeline, 3, 25);
        let (sink, mut rx) = sink();
        assert_eq!(
            coordinator.start(1, "pl", sink).await,
            StartOutcome::NoEntries
        );
        assert_eq!(coordinator.active_sessions(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_short_playlist_completes_without_prompt() {
        let pipeline = Arc::new(FakePipeline::with_entries(4));
        let coordinator = coordinator(pipeline, 3, 25);
        let (sink, mut rx) = sink();
        coordinator.start(1, "pl", sink).await;

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert_eq!(events[0], Event::Announced(4));
        assert_eq!(
            events.last(),
            Some(&Event::Finished(SessionOutcome::Completed))
        );
        let delivered = events
            .iter()
            .filter(|e| matches!(e, Event::Delivered(_)))
            .count();
        assert_eq!(delivered, 4);
        assert!(!events.iter().any(|e| matches!(e, Event::Prompt { .. })));
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_exact_chunk_multiple_finishes_without_prompt() {
        let pipeline = Arc::new(FakePipeline::with_entries(10));
        let coordinator = coordinator(pipeline, 3, 25);
        let (sink, mut rx) = sink();
        coordinator.start(1, "pl", sink).await;

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert!(!events.iter().any(|e| matches!(e, Event::Prompt { .. })));
    }

    #[tokio::test]
    async fn test_failed_item_is_reported_and_skipped() {
        let mut fake = FakePipeline::with_entries(3);
        fake.failing.insert("u1".into());
        let coordinator = coordinator(Arc::new(fake), 1, 25);
        let (sink, mut rx) = sink();
        coordinator.start(1, "pl", sink).await;

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert_eq!(
            events,
            vec![
                Event::Announced(3),
                Event::Delivered(0),
                Event::Failed(1),
                Event::Delivered(2),
                Event::Finished(SessionOutcome::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_results_are_delivered_in_completion_order() {
        let mut fake = FakePipeline::with_entries(2);
        fake.delays.insert("u0".into(), Duration::from_millis(100));
        let coordinator = coordinator(Arc::new(fake), 2, 25);
        let (sink, mut rx) = sink();
        coordinator.start(1, "pl", sink).await;

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        let delivered: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Delivered(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_non_owner_signals_are_rejected() {
        let pipeline = Arc::new(FakePipeline::with_entries(15));
        let coordinator = coordinator(pipeline.clone(), 3, 25);
        let (sink, mut rx) = sink();
        let id = session_id(coordinator.start(7, "pl", sink).await);

        collect_until(&mut rx, |e| matches!(e, Event::Prompt { .. })).await;

        assert_eq!(coordinator.continue_session(&id, 8), SignalOutcome::NotOwner);
        assert_eq!(coordinator.stop_session(&id, 8), SignalOutcome::NotOwner);
        let snapshot = coordinator.snapshot(&id).unwrap();
        assert_eq!(snapshot.phase, SessionPhase::AwaitingConfirmation);
        assert_eq!(snapshot.cursor, 10);
        assert_eq!(pipeline.prepared().len(), 10);
    }

    #[tokio::test]
    async fn test_continue_before_prompt_is_ignored() {
        let mut fake = FakePipeline::with_entries(12);
        fake.delays.insert("u0".into(), Duration::from_millis(200));
        let coordinator = coordinator(Arc::new(fake), 1, 25);
        let (sink, _rx) = sink();
        let id = session_id(coordinator.start(1, "pl", sink).await);

        assert_eq!(coordinator.continue_session(&id, 1), SignalOutcome::NotAwaiting);
        assert_eq!(coordinator.continue_session("1-missing", 1), SignalOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_queue_full_aborts_session() {
        let pipeline = Arc::new(FakePipeline::with_entries(5));
        let queue = TaskQueue::new(TaskQueueConfig {
            max_concurrent: 1,
            max_pending: 1,
        });
        let coordinator = SessionCoordinator::new(
            pipeline.clone(),
            queue.clone(),
            SessionConfig {
                chunk_size: 10,
                max_items: 100,
            },
        );

        // Another request holds the only slot and the only backlog entry.
        let (release, hold) = tokio::sync::oneshot::channel::<()>();
        let running = queue
            .submit(async move {
                let _ = hold.await;
                Ok(())
            })
            .unwrap();
        let waiting = queue.submit(async { Ok(()) }).unwrap();

        let (sink, mut rx) = sink();
        let id = session_id(coordinator.start(1, "pl", sink).await);

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert_eq!(
            events,
            vec![
                Event::Announced(5),
                Event::Finished(SessionOutcome::Aborted)
            ]
        );
        assert!(coordinator.snapshot(&id).is_none());
        assert!(pipeline.prepared().is_empty());

        release.send(()).unwrap();
        running.await.unwrap();
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_larger_than_backlog_completes() {
        let mut fake = FakePipeline::with_entries(10);
        for i in 0..10 {
            fake.delays.insert(format!("u{i}"), Duration::from_millis(5));
        }
        let pipeline = Arc::new(fake);
        let coordinator = coordinator(pipeline.clone(), 3, 5);
        let (sink, mut rx) = sink();
        let id = session_id(coordinator.start(1, "pl", sink).await);

        let snapshot = coordinator.snapshot(&id).unwrap();
        assert!(snapshot.in_flight <= 3);

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert_eq!(
            events.last(),
            Some(&Event::Finished(SessionOutcome::Completed))
        );
        let delivered = events
            .iter()
            .filter(|e| matches!(e, Event::Delivered(_)))
            .count();
        assert_eq!(delivered, 10);
        assert_eq!(pipeline.prepared().len(), 10);
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_prompt_aborts_session() {
        let pipeline = Arc::new(FakePipeline::with_entries(15));
        let coordinator = coordinator(pipeline.clone(), 3, 25);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink {
            tx,
            prompt_fails: true,
        });
        let id = session_id(coordinator.start(1, "pl", sink).await);

        let events = collect_until(&mut rx, |e| matches!(e, Event::Finished(_))).await;
        assert_eq!(
            events[events.len() - 2..].to_vec(),
            vec![
                Event::Prompt {
                    delivered: 10,
                    total: 15
                },
                Event::Finished(SessionOutcome::Aborted),
            ]
        );
        assert!(coordinator.snapshot(&id).is_none());
        assert_eq!(coordinator.active_sessions(), 0);
        assert_eq!(coordinator.continue_session(&id, 1), SignalOutcome::NotFound);
        assert_eq!(pipeline.prepared().len(), 10);
    }
}
