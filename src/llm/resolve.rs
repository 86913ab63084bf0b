use std::fmt;
use std::sync::Arc;

use crate::config::ExplainerSettings;
use crate::types::{ModelDescriptor, ProviderKind};

use super::backend::{CompletionBackend, backend_for};
use super::error::ResolveError;
use super::prompts::{DEFAULT_MODEL_LABEL, PromptMode};

/// Everything needed to issue one completion call.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub model: ModelDescriptor,
    pub backend: Arc<dyn CompletionBackend>,
    pub system_prompt: String,
    pub mode: PromptMode,
}

impl ResolvedConfig {
    pub fn provider(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn endpoint(&self) -> String {
        self.backend.chat_endpoint()
    }

    /// Name shown in the popup header.
    pub fn model_label(&self) -> &str {
        model_label(&self.model)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("model", &self.model)
            .field("backend", &self.backend)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

pub fn model_label(model: &ModelDescriptor) -> &str {
    let name = model.display_name.trim();
    if name.is_empty() {
        DEFAULT_MODEL_LABEL
    } else {
        name
    }
}

/// Read-only view over persisted settings that picks provider, credential,
/// endpoint and system prompt for a call.
#[derive(Debug, Clone, Copy)]
pub struct ProviderConfig<'a> {
    settings: &'a ExplainerSettings,
}

impl<'a> ProviderConfig<'a> {
    pub fn new(settings: &'a ExplainerSettings) -> Self {
        Self { settings }
    }

    /// Fails fast, before any network call, when no model is selected or the
    /// selected provider has no key.
    pub fn resolve(
        &self,
        prompt_override: Option<&str>,
        mode: PromptMode,
    ) -> Result<ResolvedConfig, ResolveError> {
        let model = self
            .settings
            .selected_model
            .clone()
            .ok_or(ResolveError::NoModelSelected)?;
        let backend = self.backend(model.provider)?;

        Ok(ResolvedConfig {
            model,
            backend,
            system_prompt: self.system_prompt(prompt_override, mode),
            mode,
        })
    }

    /// Backend for `provider` using its stored credential profile.
    pub fn backend(
        &self,
        provider: ProviderKind,
    ) -> Result<Arc<dyn CompletionBackend>, ResolveError> {
        let credentials = self.settings.credentials(provider);
        let api_key = credentials
            .api_key()
            .ok_or(ResolveError::MissingCredential { provider })?;
        Ok(backend_for(provider, api_key, credentials.base_url()))
    }

    /// Explicit prompt, then the stored custom prompt for `mode`, then the
    /// built-in preset. Blank prompts count as absent.
    pub fn system_prompt(&self, prompt_override: Option<&str>, mode: PromptMode) -> String {
        let stored = match mode {
            PromptMode::Explain => self.settings.custom_prompt.as_deref(),
            PromptMode::Summary => self.settings.custom_summary_prompt.as_deref(),
        };

        [prompt_override, stored]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|prompt| !prompt.is_empty())
            .unwrap_or(mode.builtin_prompt())
            .to_string()
    }
}
