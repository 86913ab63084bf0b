//! One explanation or summarisation attempt, end to end.
//!
//! State machine: `Idle -> Loading -> Streaming -> Done`, with `Failed` from
//! `Loading` or `Streaming`, and `Cancelled` when a newer session claims the
//! surface or the surface is closed. The buffer only grows; `done` is set
//! exactly once, on reaching `Done`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::ExplainerSettings;
use crate::llm::prompts::{DEFAULT_MODEL_LABEL, failure_message, render_markdown};
use crate::llm::resolve::model_label;
use crate::llm::{
    CompletionError, CompletionRequest, PromptMode, ProviderConfig, ResolveError,
    StreamingCompletionClient,
};
use crate::logging::{ExplainLogger, LogCategory};
use crate::metrics::{StreamMetrics, StreamOutcome, UsageTotals};
use crate::surface::{ERROR_AUTO_DISMISS, PresentationSurface, SessionToken, SurfaceSlot};
use crate::transport::HttpTransport;
use crate::types::ModelDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Streaming,
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Point-in-time copy of a session's observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub buffer: String,
    pub done: bool,
    pub failure: Option<SessionError>,
    pub model: Option<ModelDescriptor>,
    pub mode: PromptMode,
    pub metrics: StreamMetrics,
}

impl SessionSnapshot {
    fn new(mode: PromptMode, model: Option<ModelDescriptor>) -> Self {
        Self {
            state: SessionState::Idle,
            buffer: String::new(),
            done: false,
            failure: None,
            model,
            mode,
            metrics: StreamMetrics::default(),
        }
    }
}

/// Shared read access to a running session, for export and observers.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Mutex<SessionSnapshot>>,
    slot: Arc<SurfaceSlot>,
    generation: u64,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn buffer(&self) -> String {
        self.lock().buffer.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn failure(&self) -> Option<SessionError> {
        self.lock().failure.clone()
    }

    /// Close the session's surface (the user closed the popup). The running
    /// session stops at its next suspension point.
    pub fn close(&self) -> bool {
        self.slot.release_generation(self.generation)
    }
}

struct ExplainerInner<T: HttpTransport> {
    settings: ExplainerSettings,
    client: StreamingCompletionClient<T>,
    logger: ExplainLogger,
    slot: Arc<SurfaceSlot>,
    usage: Mutex<UsageTotals>,
}

/// Entry point that owns the completion client and the single surface slot.
pub struct Explainer<T: HttpTransport> {
    inner: Arc<ExplainerInner<T>>,
}

impl<T: HttpTransport> Clone for Explainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport> fmt::Debug for Explainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Explainer")
            .field("settings", &self.inner.settings)
            .field("client", &self.inner.client)
            .field("slot", &self.inner.slot)
            .finish()
    }
}

impl<T: HttpTransport> Explainer<T> {
    pub fn new(settings: ExplainerSettings, transport: T) -> Self {
        let client = StreamingCompletionClient::from_settings(transport, &settings);
        let logger = ExplainLogger::new(settings.verbose, settings.logger.clone());
        Self {
            inner: Arc::new(ExplainerInner {
                settings,
                client,
                logger,
                slot: Arc::new(SurfaceSlot::new()),
                usage: Mutex::new(UsageTotals::default()),
            }),
        }
    }

    pub fn settings(&self) -> &ExplainerSettings {
        &self.inner.settings
    }

    pub fn logger(&self) -> &ExplainLogger {
        &self.inner.logger
    }

    pub fn usage(&self) -> UsageTotals {
        self.inner
            .usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create a session bound to `surface`, neutralising any earlier one.
    ///
    /// Nothing happens until [`ExplanationSession::run`] is awaited.
    pub fn start(
        &self,
        text: impl Into<String>,
        prompt_override: Option<&str>,
        mode: PromptMode,
        surface: Arc<dyn PresentationSurface>,
    ) -> ExplanationSession<T> {
        let token = self.inner.slot.claim(Arc::clone(&surface));
        let shared = Arc::new(Mutex::new(SessionSnapshot::new(
            mode,
            self.inner.settings.selected_model.clone(),
        )));
        let handle = SessionHandle {
            shared,
            slot: Arc::clone(&self.inner.slot),
            generation: token.generation(),
        };

        ExplanationSession {
            explainer: self.clone(),
            token,
            text: text.into(),
            prompt_override: prompt_override.map(str::to_string),
            mode,
            surface,
            handle,
        }
    }

    /// [`start`](Self::start) and run to completion.
    pub async fn explain(
        &self,
        text: impl Into<String>,
        prompt_override: Option<&str>,
        mode: PromptMode,
        surface: Arc<dyn PresentationSurface>,
    ) -> SessionSnapshot {
        self.start(text, prompt_override, mode, surface).run().await
    }
}

pub struct ExplanationSession<T: HttpTransport> {
    explainer: Explainer<T>,
    token: SessionToken,
    text: String,
    prompt_override: Option<String>,
    mode: PromptMode,
    surface: Arc<dyn PresentationSurface>,
    handle: SessionHandle,
}

impl<T: HttpTransport> fmt::Debug for ExplanationSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplanationSession")
            .field("token", &self.token)
            .field("mode", &self.mode)
            .field("text_len", &self.text.len())
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> ExplanationSession<T> {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drive the session to a terminal state and return its final snapshot.
    pub async fn run(mut self) -> SessionSnapshot {
        let started = Instant::now();
        let result = self.drive(started).await;

        let outcome = match &result {
            Ok(StreamOutcome::Completed) => {
                let mut shared = self.handle.lock();
                shared.state = SessionState::Done;
                shared.done = true;
                StreamOutcome::Completed
            }
            Ok(StreamOutcome::Cancelled) => {
                self.handle.lock().state = SessionState::Cancelled;
                StreamOutcome::Cancelled
            }
            Ok(StreamOutcome::Failed) => StreamOutcome::Failed,
            Err(err) => {
                self.fail(err.clone());
                StreamOutcome::Failed
            }
        };

        let snapshot = {
            let mut shared = self.handle.lock();
            shared.metrics.finish(outcome, started.elapsed());
            shared.clone()
        };
        self.log_finish(&snapshot);
        if let Some(model) = &snapshot.model {
            self.explainer
                .inner
                .usage
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(model.provider, &snapshot.metrics);
        }
        snapshot
    }

    /// `true` while this session owns the slot and its surface is open.
    fn is_live(&self) -> bool {
        self.explainer.inner.slot.is_current(&self.token) && self.surface.is_open()
    }

    async fn drive(&mut self, started: Instant) -> Result<StreamOutcome, SessionError> {
        let inner = Arc::clone(&self.explainer.inner);
        self.handle.lock().state = SessionState::Loading;

        let label = inner
            .settings
            .selected_model
            .as_ref()
            .map(model_label)
            .unwrap_or(DEFAULT_MODEL_LABEL);
        if self.is_live() {
            self.surface.show_loading(label);
        }

        let resolved = ProviderConfig::new(&inner.settings)
            .resolve(self.prompt_override.as_deref(), self.mode)?;
        let request = CompletionRequest::new(&resolved, self.text.clone());

        inner.logger.debug(
            LogCategory::Session,
            "opening completion stream",
            Some(json!({
                "model": resolved.model.id,
                "provider": resolved.provider().as_str(),
                "mode": format!("{:?}", self.mode),
                "generation": self.token.generation(),
            })),
        );

        let opened = tokio::select! {
            biased;
            _ = self.token.superseded() => None,
            opened = inner.client.open(&request) => Some(opened),
        };
        let Some(opened) = opened else {
            return Ok(self.cancel("superseded while connecting"));
        };
        let mut stream = opened?;
        self.handle.lock().state = SessionState::Streaming;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.superseded() => None,
                item = stream.next() => Some(item),
            };
            let Some(next) = next else {
                return Ok(self.cancel("superseded mid-stream"));
            };

            if !self.is_live() {
                return Ok(self.cancel("surface gone; dropping stream"));
            }

            match next {
                Some(Ok(fragment)) => {
                    let markdown = {
                        let mut shared = self.handle.lock();
                        shared.buffer.push_str(&fragment);
                        shared.metrics.record_fragment(&fragment, started.elapsed());
                        render_markdown(&shared.buffer)
                    };
                    self.surface.render(&markdown);
                }
                Some(Err(err)) => {
                    self.record_skipped(stream.skipped_frames());
                    self.fail(err.into());
                    return Ok(StreamOutcome::Failed);
                }
                None => {
                    self.record_skipped(stream.skipped_frames());
                    return Ok(StreamOutcome::Completed);
                }
            }
        }
    }

    fn record_skipped(&self, skipped: u64) {
        let mut shared = self.handle.lock();
        for _ in 0..skipped {
            shared.metrics.record_skipped_frame();
        }
    }

    /// Terminal failure: a standalone error when nothing streamed yet,
    /// otherwise the message is appended to the visible buffer.
    fn fail(&self, err: SessionError) {
        let live = self.is_live();
        let message = err.to_string();
        let rendered = {
            let mut shared = self.handle.lock();
            shared.state = SessionState::Failed;
            shared.failure = Some(err);
            if shared.buffer.is_empty() {
                None
            } else {
                shared.buffer.push_str(&message);
                Some(render_markdown(&shared.buffer))
            }
        };

        self.explainer
            .inner
            .logger
            .error(LogCategory::Session, format!("session failed: {message}"), None);

        if !live {
            return;
        }
        match rendered {
            Some(markdown) => self.surface.render(&markdown),
            None => self
                .surface
                .show_error(&failure_message(&message), ERROR_AUTO_DISMISS),
        }
    }

    fn cancel(&self, reason: &str) -> StreamOutcome {
        self.explainer.inner.logger.info(
            LogCategory::Session,
            format!("session cancelled: {reason}"),
            Some(json!({ "generation": self.token.generation() })),
        );
        StreamOutcome::Cancelled
    }

    fn log_finish(&self, snapshot: &SessionSnapshot) {
        self.explainer.inner.logger.info(
            LogCategory::Session,
            format!("session finished: {:?}", snapshot.state),
            Some(json!({
                "fragments": snapshot.metrics.fragments,
                "characters": snapshot.metrics.characters,
                "skipped_frames": snapshot.metrics.skipped_frames,
                "total_time_ms": snapshot.metrics.total_time_ms,
            })),
        );
    }
}
