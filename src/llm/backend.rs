//! Provider-specific behaviour behind one capability trait.
//!
//! Both providers speak the same chat-completions dialect; they differ in
//! where requests go. Call sites hold an `Arc<dyn CompletionBackend>` picked
//! from the selected model's [`ProviderKind`] and never branch on provider.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::ProviderKind;

pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";
pub const OPENAI_API_BASE: &str = "https://api.openai.com";

/// Terminal sentinel carried by the last event of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Delta(String),
    /// Well-formed event without text (role announcement, reasoning, usage).
    Skip,
    Done,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed event payload: {0}")]
    Malformed(String),
    /// The provider sent an `{"error": ...}` event mid-stream.
    #[error("{0}")]
    Remote(String),
}

pub trait CompletionBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    fn chat_endpoint(&self) -> String;

    fn models_endpoint(&self) -> String;

    fn api_key(&self) -> &str;

    /// Header name and value carrying the credential.
    fn auth_header(&self) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", self.api_key()))
    }

    /// Decode the `data` field of one event-stream event.
    fn decode_stream_frame(&self, data: &str) -> Result<StreamFrame, FrameError> {
        decode_chat_delta(data)
    }
}

#[derive(Clone)]
pub struct DeepSeekBackend {
    api_key: String,
}

impl DeepSeekBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for DeepSeekBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepSeekBackend").finish_non_exhaustive()
    }
}

impl CompletionBackend for DeepSeekBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn chat_endpoint(&self) -> String {
        format!("{DEEPSEEK_API_BASE}/chat/completions")
    }

    fn models_endpoint(&self) -> String {
        format!("{DEEPSEEK_API_BASE}/models")
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    api_key: String,
    base_url: String,
}

impl OpenAiCompatibleBackend {
    /// `base_url` defaults to the public OpenAI host and is normalised.
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: normalize_base_url(base_url.unwrap_or(OPENAI_API_BASE)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CompletionBackend for OpenAiCompatibleBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn models_endpoint(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// Build the backend for `provider`.
pub fn backend_for(
    provider: ProviderKind,
    api_key: &str,
    base_url: Option<&str>,
) -> Arc<dyn CompletionBackend> {
    match provider {
        ProviderKind::DeepSeek => Arc::new(DeepSeekBackend::new(api_key)),
        ProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleBackend::new(api_key, base_url)),
    }
}

/// Strip trailing `/` and `/v1` segments until neither remains.
///
/// Idempotent: `normalize_base_url(normalize_base_url(x)) == normalize_base_url(x)`.
pub fn normalize_base_url(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        if let Some(stripped) = current.strip_suffix('/') {
            current = stripped;
        } else if let Some(stripped) = current.strip_suffix("/v1") {
            current = stripped;
        } else {
            break;
        }
    }
    current.to_string()
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode a chat-completions stream event: `choices[0].delta.content`, the
/// `[DONE]` sentinel, or an `{"error": ...}` payload.
pub fn decode_chat_delta(data: &str) -> Result<StreamFrame, FrameError> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(StreamFrame::Done);
    }
    if data.is_empty() {
        return Ok(StreamFrame::Skip);
    }

    let payload: ChunkPayload =
        serde_json::from_str(data).map_err(|err| FrameError::Malformed(err.to_string()))?;

    if let Some(error) = payload.error.as_ref().filter(|value| !value.is_null()) {
        return Err(FrameError::Remote(remote_error_message(error)));
    }

    let text = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());

    Ok(match text {
        Some(text) => StreamFrame::Delta(text),
        None => StreamFrame::Skip,
    })
}

/// Extract a human-readable message from an `error` value.
pub(crate) fn remote_error_message(error: &Value) -> String {
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = error.as_str() {
        return message.to_string();
    }
    "the provider reported an error during streaming".to_string()
}
