//! Push a finished explanation into a local notes application.
//!
//! The bridge speaks the Logseq-style HTTP API: a single POST carrying
//! `{"method": ..., "args": [...]}` with an optional bearer token.

use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, warn};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::error::Elapsed;
use tokio::time::{Instant, timeout_at};

use crate::config::NoteBridgeConfig;
use crate::llm::backend::remote_error_message;
use crate::llm::prompts::{CONTENT_NOT_READY_TEXT, DEFAULT_MODEL_LABEL, failure_message};
use crate::llm::resolve::model_label;
use crate::session::{SessionHandle, SessionSnapshot};
use crate::transport::{HttpRequest, HttpTransport, TransportError};

pub const APPEND_BLOCK_METHOD: &str = "logseq.Editor.appendBlockInPage";

/// The bridge is local; anything slower than this is treated as hung.
pub const NOTE_BRIDGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("explanation is not complete yet")]
    ContentNotReady,
    #[error("note bridge rejected the block (HTTP {status}): {message}")]
    Bridge { status: u16, message: String },
    #[error("note bridge did not answer within {secs} seconds")]
    Timeout { secs: u64 },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ExportError {
    /// Text shown to the user next to the sync button.
    pub fn user_message(&self) -> String {
        match self {
            ExportError::ContentNotReady => CONTENT_NOT_READY_TEXT.to_string(),
            other => failure_message(other),
        }
    }
}

/// Block text for one exported explanation: a header line, then the buffer.
///
/// The disclaimer shown on screen is not part of the note.
pub fn format_note(snapshot: &SessionSnapshot, at: DateTime<Local>) -> String {
    let label = snapshot
        .model
        .as_ref()
        .map(model_label)
        .unwrap_or(DEFAULT_MODEL_LABEL);
    format!(
        "**{}** · {}\n{}",
        at.format("%Y-%m-%d %H:%M"),
        label,
        snapshot.buffer.trim_end()
    )
}

pub struct NoteBridge<T: HttpTransport> {
    transport: T,
    config: NoteBridgeConfig,
    timeout: Duration,
}

impl<T: HttpTransport> std::fmt::Debug for NoteBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteBridge")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> NoteBridge<T> {
    pub fn new(transport: T, config: NoteBridgeConfig) -> Self {
        Self {
            transport,
            config,
            timeout: NOTE_BRIDGE_TIMEOUT,
        }
    }

    /// Bound on the whole call, submission and response body together.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &NoteBridgeConfig {
        &self.config
    }

    /// Export the session's buffer. Only sessions that reached `Done` qualify.
    pub async fn export(&self, handle: &SessionHandle) -> Result<Value, ExportError> {
        let snapshot = handle.snapshot();
        if !snapshot.done {
            return Err(ExportError::ContentNotReady);
        }
        self.append_block(&format_note(&snapshot, Local::now())).await
    }

    pub async fn append_block(&self, content: &str) -> Result<Value, ExportError> {
        let body = json!({
            "method": APPEND_BLOCK_METHOD,
            "args": [self.config.page, content],
        });
        let mut request = HttpRequest::post_json(&self.config.url, body);
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.trim().is_empty()) {
            request = request.header("Authorization", format!("Bearer {}", token.trim()));
        }

        debug!(
            "appending note block to page {:?} via {}",
            self.config.page, self.config.url
        );
        let secs = self.timeout.as_secs();
        let timed_out = |_: Elapsed| ExportError::Timeout { secs };
        let deadline = Instant::now()
            .checked_add(self.timeout)
            .unwrap_or_else(|| Instant::now() + NOTE_BRIDGE_TIMEOUT);
        let response = timeout_at(deadline, self.transport.execute(request))
            .await
            .map_err(timed_out)??;
        let status = response.status;
        let success = response.is_success();
        let text = timeout_at(deadline, response.text()).await.map_err(timed_out)??;

        if !success {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| value.get("error").map(remote_error_message))
                .unwrap_or_else(|| text.trim().to_string());
            warn!("note bridge returned HTTP {status}: {message}");
            return Err(ExportError::Bridge { status, message });
        }

        // The bridge answers `null` or the created block.
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}
