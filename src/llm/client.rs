use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use log::debug;
use serde_json::Value;
use tokio::time::{Instant, timeout_at};

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, ExplainerSettings};
use crate::transport::{HttpRequest, HttpTransport, StreamingHttpResponse};

use super::backend::{CompletionBackend, remote_error_message};
use super::error::CompletionError;
use super::resolve::ResolvedConfig;
use super::stream::{DecodePolicy, FragmentStream};

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Text,
    Json,
}

/// One chat-completion call: system prompt, user text, model and target.
#[derive(Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub model_id: String,
    pub endpoint: String,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseMode>,
    backend: Arc<dyn CompletionBackend>,
}

impl CompletionRequest {
    pub fn new(resolved: &ResolvedConfig, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: resolved.system_prompt.clone(),
            user_text: user_text.into(),
            model_id: resolved.model.id.clone(),
            endpoint: resolved.endpoint(),
            temperature: None,
            response_format: None,
            backend: Arc::clone(&resolved.backend),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_format(mut self, mode: ResponseMode) -> Self {
        self.response_format = Some(mode);
        self
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// Streaming chat-completions body built with `async-openai` types.
    pub fn to_chat_request(&self) -> Result<CreateChatCompletionRequest, CompletionError> {
        let system = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(ChatCompletionRequestSystemMessageContent::Text(
                    self.system_prompt.clone(),
                ))
                .build()
                .map_err(|err| CompletionError::InvalidRequest(err.to_string()))?,
        );
        let user = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Text(
                    self.user_text.clone(),
                ))
                .build()
                .map_err(|err| CompletionError::InvalidRequest(err.to_string()))?,
        );

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model_id.clone())
            .messages(vec![system, user])
            .stream(true);
        if let Some(temperature) = self.temperature {
            builder.temperature(temperature);
        }
        if let Some(mode) = self.response_format {
            builder.response_format(match mode {
                ResponseMode::Text => ResponseFormat::Text,
                ResponseMode::Json => ResponseFormat::JsonObject,
            });
        }

        builder
            .build()
            .map_err(|err| CompletionError::InvalidRequest(err.to_string()))
    }

    fn to_http_request(&self) -> Result<HttpRequest, CompletionError> {
        let body = serde_json::to_value(self.to_chat_request()?)
            .map_err(|err| CompletionError::InvalidRequest(err.to_string()))?;
        let (header, value) = self.backend.auth_header();
        Ok(HttpRequest::post_json(self.endpoint.clone(), body)
            .header(header, value)
            .header("Accept", "text/event-stream"))
    }
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("model_id", &self.model_id)
            .field("endpoint", &self.endpoint)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("user_text_len", &self.user_text.len())
            .field("temperature", &self.temperature)
            .field("response_format", &self.response_format)
            .finish()
    }
}

/// Issues streamed chat completions under a hard wall-clock bound.
pub struct StreamingCompletionClient<T: HttpTransport> {
    transport: T,
    timeout: Duration,
    policy: DecodePolicy,
}

impl<T: HttpTransport> fmt::Debug for StreamingCompletionClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCompletionClient")
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> StreamingCompletionClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            policy: DecodePolicy::default(),
        }
    }

    pub fn from_settings(transport: T, settings: &ExplainerSettings) -> Self {
        Self::new(transport)
            .with_timeout(settings.request_timeout())
            .with_policy(settings.stream_policy)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: DecodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit `request` and return its fragment stream.
    ///
    /// The deadline starts here and also bounds every later read of the
    /// returned stream.
    pub async fn open(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, CompletionError> {
        let secs = self.timeout.as_secs();
        let deadline = Instant::now().checked_add(self.timeout).ok_or_else(|| {
            CompletionError::InvalidRequest(format!("request timeout of {secs}s is out of range"))
        })?;
        let http_request = request.to_http_request()?;

        debug!(
            "opening completion stream: model={} endpoint={}",
            request.model_id, request.endpoint
        );

        let response = timeout_at(deadline, self.transport.execute(http_request))
            .await
            .map_err(|_| CompletionError::Timeout { secs })??;

        if !response.is_success() {
            return Err(status_error(response, deadline, secs).await);
        }

        Ok(FragmentStream::new(
            response.body,
            Arc::clone(&request.backend),
            self.policy,
            deadline,
            secs,
        ))
    }
}

/// Map a non-2xx response to the error taxonomy, surfacing a structured
/// `{"error": ...}` message when the body carries one.
async fn status_error(
    response: StreamingHttpResponse,
    deadline: Instant,
    secs: u64,
) -> CompletionError {
    let status = response.status;
    let body = match timeout_at(deadline, response.text()).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(_)) => None,
        Err(_) => return CompletionError::Timeout { secs },
    };
    let message = body
        .as_deref()
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .and_then(|value| value.get("error").map(remote_error_message))
        .unwrap_or_else(|| default_status_message(status));

    match status {
        401 | 403 => CompletionError::Unauthorized { status, message },
        _ => CompletionError::Network {
            status: Some(status),
            message,
        },
    }
}

fn default_status_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}
