//! Connection lifecycle and the stream task
//!
//! `ChatEngine` owns one visible session at a time. Turns run as a spawned
//! stream task: a `tokio::select!` loop over the transport's byte chunks,
//! the delta batcher's flush deadline, and a cancellation token. Every
//! mutation of the session state happens under one lock, and the registered
//! observer is notified on each committed revision.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ChatTransport, StreamRequest};
use crate::data::SessionStore;
use crate::engine::error::EngineError;
use crate::engine::observer::{NoopObserver, TranscriptObserver};
use crate::session::{convert_raw_messages, merge_ephemeral, transcripts_equivalent, SessionCache};
use crate::stream::batcher::{DeltaBatcher, DEFAULT_FRAME_INTERVAL};
use crate::stream::events::StreamEvent;
use crate::stream::frame::FrameDecoder;
use crate::transcript::effects::{DiffKind, WorkspaceEffects};
use crate::transcript::reducer::{
    apply_event, close_open_thinking, dispose_batcher, flush_deltas, mark_stopped, SessionState,
};
use crate::transcript::types::{Message, SessionId, SessionInfo, SessionStatus};

/// Delay before the post-error backend refresh
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(2);

/// Page size used when rebuilding a transcript from the backend log
const MESSAGE_PAGE_LIMIT: usize = 200;

const SESSION_TITLE_MAX: usize = 60;

/// Mutable engine state, one session visible at a time
struct EngineState {
    session: SessionState,
    effects: WorkspaceEffects,
    /// Bumped on every session switch; async loads and stream tasks
    /// compare against it before committing, so neither a stale load nor
    /// a stale stream ever clobbers a newer session.
    load_version: u64,
    cancel: Option<CancellationToken>,
    /// Identity of the one allowed live subscription
    active_subscription: Option<Uuid>,
    /// Set by [`ChatEngine::cancel`]. Distinguishes a user stop (patch the
    /// transcript to a stopped shape) from a token cancelled because the
    /// stream was merely replaced or the session switched (exit silently).
    stop_requested: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            session: SessionState::new(SessionId::new("")),
            effects: WorkspaceEffects::default(),
            load_version: 0,
            cancel: None,
            active_subscription: None,
            stop_requested: false,
        }
    }

    fn has_session(&self) -> bool {
        !self.session.id.as_str().is_empty()
    }
}

/// Outcome of applying one frame to the session
enum Dispatch {
    Continue,
    Finished,
    /// The visible session changed since the stream started
    Stale,
}

#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<Mutex<EngineState>>,
    transport: Arc<dyn ChatTransport>,
    cache: Arc<SessionCache>,
    sessions: Option<SessionStore>,
    observer: Arc<dyn TranscriptObserver>,
    frame_interval: Duration,
    recovery_delay: Duration,
}

impl ChatEngine {
    pub fn new(transport: Arc<dyn ChatTransport>, cache: Arc<SessionCache>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineState::new())),
            transport,
            cache,
            sessions: None,
            observer: Arc::new(NoopObserver),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
        }
    }

    /// Attach the session directory so persists keep it in sync.
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TranscriptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay = delay;
        self
    }

    /// Clone of the current session state, for rendering or assertions.
    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().session.clone()
    }

    pub fn effects_snapshot(&self) -> WorkspaceEffects {
        self.inner.lock().effects.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().session.streaming
    }

    /// Start a new turn with a user message. Rejected while a turn is
    /// already streaming; the message pair is appended optimistically
    /// before the transport is even contacted.
    pub fn send(
        &self,
        content: impl Into<String>,
        attachments: Vec<String>,
    ) -> Result<(), EngineError> {
        let content = content.into();
        let (request, token, version) = {
            let mut guard = self.inner.lock();
            if guard.session.streaming {
                return Err(EngineError::Busy);
            }
            let session_id = guard.has_session().then(|| guard.session.id.clone());
            guard.session.messages.push(Message::user(
                content.clone(),
                (!attachments.is_empty()).then(|| attachments.clone()),
            ));
            guard.session.messages.push(Message::assistant());
            guard.session.streaming = true;
            guard.session.error_seen = false;
            guard.stop_requested = false;
            let token = CancellationToken::new();
            guard.cancel = Some(token.clone());
            self.observer.revision(&guard.session);
            (
                StreamRequest::Send {
                    session_id,
                    content,
                    attachments,
                },
                token,
                guard.load_version,
            )
        };
        self.spawn_stream(request, token, false, None, version);
        Ok(())
    }

    /// Resume a turn suspended on an approval or question. No new message
    /// pair: the stream keeps appending into the trailing assistant message.
    pub fn continue_turn(&self) -> Result<(), EngineError> {
        let (request, token, version) = {
            let mut guard = self.inner.lock();
            if guard.session.streaming {
                return Err(EngineError::Busy);
            }
            if !guard.has_session() {
                return Err(EngineError::NoSession);
            }
            guard.session.streaming = true;
            guard.session.error_seen = false;
            guard.stop_requested = false;
            let token = CancellationToken::new();
            guard.cancel = Some(token.clone());
            self.observer.revision(&guard.session);
            (
                StreamRequest::Continue {
                    session_id: guard.session.id.clone(),
                },
                token,
                guard.load_version,
            )
        };
        self.spawn_stream(request, token, false, None, version);
        Ok(())
    }

    /// Attach to a turn already running server-side. At most one live
    /// subscription: a second call replaces the first, which exits without
    /// touching the transcript. The replayed `session_init` is skipped so
    /// the id cannot be reassigned mid-view.
    pub fn resubscribe(&self) -> Result<(), EngineError> {
        let (request, token, subscription, version) = {
            let mut guard = self.inner.lock();
            if !guard.has_session() {
                return Err(EngineError::NoSession);
            }
            if let Some(previous) = guard.cancel.take() {
                previous.cancel();
            }
            let subscription = Uuid::new_v4();
            guard.active_subscription = Some(subscription);
            if !matches!(guard.session.messages.last(), Some(Message::Assistant { .. })) {
                guard.session.messages.push(Message::assistant());
            }
            guard.session.streaming = true;
            guard.session.error_seen = false;
            guard.stop_requested = false;
            let token = CancellationToken::new();
            guard.cancel = Some(token.clone());
            self.observer.revision(&guard.session);
            (
                StreamRequest::Resubscribe {
                    session_id: guard.session.id.clone(),
                },
                token,
                subscription,
                guard.load_version,
            )
        };
        self.spawn_stream(request, token, true, Some(subscription), version);
        Ok(())
    }

    /// Cooperatively stop the in-flight turn. The backend abort is
    /// fire-and-forget; the local state is patched to a terminal stopped
    /// shape by the stream task's cancellation branch.
    pub fn cancel(&self) {
        let (token, session_id) = {
            let mut guard = self.inner.lock();
            let token = guard.cancel.take();
            if token.is_some() {
                guard.stop_requested = true;
            }
            (token, guard.session.id.clone())
        };
        let Some(token) = token else {
            return;
        };
        token.cancel();

        if !session_id.as_str().is_empty() {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.abort(&session_id).await {
                    tracing::warn!(session = %session_id, error = %e, "abort request failed");
                }
            });
        }
    }

    /// Resolve the pending approval and resume the turn. A collaborator
    /// failure is logged and the resume still happens; the stream will
    /// re-announce the approval if the backend never saw the decision.
    pub async fn resolve_approval(&self, approved: bool) -> Result<(), EngineError> {
        let approval = self
            .inner
            .lock()
            .session
            .pending_approval
            .take()
            .ok_or(EngineError::NoPendingApproval)?;
        if let Err(e) = self
            .transport
            .submit_approval(&approval.approval_id, approved)
            .await
        {
            tracing::warn!(approval = %approval.approval_id, error = %e, "approval submission failed");
        }
        self.continue_turn()
    }

    /// Answer the pending question and resume the turn.
    pub async fn answer_question(&self, answers: Vec<String>) -> Result<(), EngineError> {
        let question = self
            .inner
            .lock()
            .session
            .pending_question
            .take()
            .ok_or(EngineError::NoPendingQuestion)?;
        if let Err(e) = self
            .transport
            .answer_question(&question.question_id, &answers)
            .await
        {
            tracing::warn!(question = %question.question_id, error = %e, "question answer failed");
        }
        self.continue_turn()
    }

    /// Roll the session back to just before `message_id`, locally and on
    /// the backend.
    pub async fn rollback(&self, message_id: &str) -> Result<(), EngineError> {
        let session_id = {
            let guard = self.inner.lock();
            if !guard.has_session() {
                return Err(EngineError::NoSession);
            }
            if guard.session.streaming {
                return Err(EngineError::Busy);
            }
            guard.session.id.clone()
        };
        self.transport.rollback(&session_id, message_id).await?;
        {
            let mut guard = self.inner.lock();
            if let Some(idx) = guard
                .session
                .messages
                .iter()
                .position(|m| m.id() == message_id)
            {
                guard.session.messages.truncate(idx);
            }
            self.observer.revision(&guard.session);
        }
        self.persist_now().await;
        Ok(())
    }

    /// Switch the visible session: memory tier, then durable tier, then a
    /// backend rebuild, committing each layer only while the load is still
    /// the newest one.
    pub async fn load_session(&self, id: SessionId) {
        let version = {
            let mut guard = self.inner.lock();
            if let Some(previous) = guard.cancel.take() {
                previous.cancel();
            }
            guard.load_version += 1;
            guard.session = SessionState::new(id.clone());
            guard.effects = WorkspaceEffects::default();
            self.observer.revision(&guard.session);
            guard.load_version
        };

        let cached = match self.cache.get_memory(&id) {
            Some(messages) => Some(messages),
            None => self.cache.get_durable(&id).await,
        };
        if let Some(messages) = cached {
            let mut guard = self.inner.lock();
            if guard.load_version != version {
                return;
            }
            guard.session.messages = messages;
            self.observer.revision(&guard.session);
        }

        self.refresh_from_backend(&id, version).await;
    }

    /// Replace-visible refresh from the backend's canonical log, gated by
    /// load version, streaming flag, and structural equivalence.
    async fn refresh_from_backend(&self, id: &SessionId, version: u64) {
        let raw = match self
            .transport
            .fetch_messages(id, MESSAGE_PAGE_LIMIT, 0)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "backend transcript fetch failed");
                return;
            }
        };
        let mut effects = WorkspaceEffects::default();
        let refreshed = convert_raw_messages(&raw, &mut effects);
        if refreshed.is_empty() {
            // The backend not knowing the session yet must not wipe a
            // locally visible transcript.
            tracing::debug!(session = %id, "backend returned no messages, keeping local view");
            return;
        }
        match self.transport.fetch_workbook_events(id).await {
            Ok(events) => apply_workbook_events(&mut effects, &events),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "workbook event fetch failed");
            }
        }

        let committed = {
            let mut guard = self.inner.lock();
            if guard.load_version != version || guard.session.streaming {
                return;
            }
            if transcripts_equivalent(&guard.session.messages, &refreshed) {
                false
            } else {
                let merged = merge_ephemeral(&guard.session.messages, refreshed);
                guard.session.messages = merged;
                for path in &effects.affected_files {
                    guard.effects.touch_file(path);
                }
                guard.effects.diffs.extend(effects.diffs);
                guard.effects.previews.extend(effects.previews);
                self.observer.revision(&guard.session);
                true
            }
        };
        if committed {
            self.persist_now().await;
        }
    }

    fn spawn_stream(
        &self,
        request: StreamRequest,
        token: CancellationToken,
        skip_session_init: bool,
        subscription: Option<Uuid>,
        version: u64,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_stream(request, token, skip_session_init, subscription, version)
                .await;
        });
    }

    async fn run_stream(
        &self,
        request: StreamRequest,
        token: CancellationToken,
        skip_session_init: bool,
        subscription: Option<Uuid>,
        version: u64,
    ) {
        let mut stream = match self.transport.open_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open event stream");
                let id = {
                    let mut guard = self.inner.lock();
                    if guard.load_version != version {
                        return;
                    }
                    guard.session.record_error(format!("connection failed: {e}"));
                    guard.session.streaming = false;
                    guard.cancel = None;
                    self.observer.revision(&guard.session);
                    guard.session.id.clone()
                };
                self.persist_now().await;
                if !id.as_str().is_empty() && !token.is_cancelled() {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        sleep(engine.recovery_delay).await;
                        engine.refresh_from_backend(&id, version).await;
                    });
                }
                return;
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut batcher = DeltaBatcher::new(self.frame_interval);
        let mut finished = false;

        'read: loop {
            let deadline = batcher.deadline();
            tokio::select! {
                _ = token.cancelled() => {
                    let stop = {
                        let mut guard = self.inner.lock();
                        let replaced = guard.load_version != version
                            || subscription.is_some_and(|u| guard.active_subscription != Some(u));
                        if replaced || !guard.stop_requested {
                            // Replaced subscription or session switch: the
                            // transcript now belongs to someone else.
                            return;
                        }
                        guard.stop_requested = false;
                        dispose_batcher(&mut guard.session, &mut batcher);
                        mark_stopped(&mut guard.session);
                        self.observer.revision(&guard.session);
                        true
                    };
                    if stop {
                        self.persist_now().await;
                    }
                    return;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let mut guard = self.inner.lock();
                    if guard.load_version != version {
                        return;
                    }
                    flush_deltas(&mut guard.session, &mut batcher);
                    self.observer.revision(&guard.session);
                }

                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for frame in decoder.push(&bytes) {
                            match self.dispatch_frame(&frame.event, frame.json(), &mut batcher, skip_session_init, version) {
                                Dispatch::Stale => return,
                                Dispatch::Finished => {
                                    finished = true;
                                    break 'read;
                                }
                                Dispatch::Continue => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "event stream transport error");
                        let mut guard = self.inner.lock();
                        if guard.load_version != version {
                            return;
                        }
                        dispose_batcher(&mut guard.session, &mut batcher);
                        guard.session.record_error(format!("connection lost: {e}"));
                        self.observer.revision(&guard.session);
                        break 'read;
                    }
                    None => {
                        if let Some(frame) = decoder.finish() {
                            match self.dispatch_frame(&frame.event, frame.json(), &mut batcher, skip_session_init, version) {
                                Dispatch::Stale => return,
                                Dispatch::Finished => finished = true,
                                Dispatch::Continue => {}
                            }
                        }
                        break 'read;
                    }
                },
            }
        }

        // Terminal path shared by done, transport error, and reader end.
        let (error_seen, id) = {
            let mut guard = self.inner.lock();
            if guard.load_version != version {
                return;
            }
            if subscription.is_some() && guard.active_subscription != subscription {
                return;
            }
            guard.active_subscription = None;
            dispose_batcher(&mut guard.session, &mut batcher);
            close_open_thinking(&mut guard.session);
            guard.session.streaming = false;
            guard.session.activity = None;
            guard.cancel = None;
            if !finished && !guard.session.error_seen {
                tracing::debug!(session = %guard.session.id, "stream ended without done event");
            }
            self.observer.revision(&guard.session);
            (guard.session.error_seen, guard.session.id.clone())
        };
        self.persist_now().await;

        if error_seen && !token.is_cancelled() {
            let engine = self.clone();
            tokio::spawn(async move {
                sleep(engine.recovery_delay).await;
                engine.refresh_from_backend(&id, version).await;
            });
        }
    }

    /// Apply one decoded frame. A frame that fails to decode is dropped and
    /// the loop keeps reading; a frame arriving after the session switched
    /// out from under the stream reports [`Dispatch::Stale`] so the task
    /// exits without touching the new session.
    fn dispatch_frame(
        &self,
        name: &str,
        payload: Option<Value>,
        batcher: &mut DeltaBatcher,
        skip_session_init: bool,
        version: u64,
    ) -> Dispatch {
        let Some(payload) = payload else {
            return Dispatch::Continue;
        };
        let Some(event) = StreamEvent::decode(name, payload) else {
            return Dispatch::Continue;
        };
        if skip_session_init && matches!(event, StreamEvent::SessionInit(_)) {
            return Dispatch::Continue;
        }
        let finished = matches!(event, StreamEvent::Done);
        let is_delta = event.is_delta();

        let mut guard = self.inner.lock();
        if guard.load_version != version {
            return Dispatch::Stale;
        }
        let EngineState {
            session, effects, ..
        } = &mut *guard;
        apply_event(session, batcher, effects, event);
        if !is_delta {
            self.observer.revision(&guard.session);
        }
        if finished {
            Dispatch::Finished
        } else {
            Dispatch::Continue
        }
    }

    /// Write-through persist plus session directory upkeep.
    async fn persist_now(&self) {
        let (id, messages, in_flight) = {
            let guard = self.inner.lock();
            (
                guard.session.id.clone(),
                guard.session.messages.clone(),
                guard.session.streaming,
            )
        };
        if id.as_str().is_empty() {
            return;
        }
        self.cache.persist(&id, &messages).await;
        self.sync_directory(&id, &messages, in_flight);
    }

    fn sync_directory(&self, id: &SessionId, messages: &[Message], in_flight: bool) {
        let Some(store) = &self.sessions else {
            return;
        };
        let known = match store.get(id) {
            Ok(row) => row.is_some(),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "session directory read failed");
                return;
            }
        };
        let result = if known {
            store.touch(id, messages.len(), in_flight)
        } else {
            store.create(&SessionInfo {
                id: id.clone(),
                title: session_title(messages),
                message_count: messages.len(),
                in_flight,
                status: SessionStatus::Active,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
        };
        if let Err(e) = result {
            tracing::warn!(session = %id, error = %e, "session directory update failed");
        }
    }
}

/// Title derived from the first user message
fn session_title(messages: &[Message]) -> String {
    let first = messages.iter().find_map(|m| match m {
        Message::User { content, .. } => Some(content.as_str()),
        _ => None,
    });
    match first {
        Some(content) => {
            let line = content.lines().next().unwrap_or(content);
            line.chars().take(SESSION_TITLE_MAX).collect()
        }
        None => "Untitled session".to_string(),
    }
}

/// Fold the backend's recorded workbook events into the effects store.
fn apply_workbook_events(effects: &mut WorkspaceEffects, events: &Value) {
    let Some(items) = events.as_array() else {
        return;
    };
    for item in items {
        let Some(file_path) = item.get("file_path").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(diff) = item.get("diff") else {
            continue;
        };
        let kind = if diff.is_string() {
            DiffKind::Text
        } else {
            DiffKind::Excel
        };
        effects.record_diff(file_path.to_string(), kind, diff.clone());
    }
}
