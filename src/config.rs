//! Strongly-typed settings for the explainer.
//!
//! The browser extension keeps its configuration in extension storage; this
//! module models the same keys (two credential profiles, the selected model,
//! custom prompts, and the model catalog) with serde so an exported settings
//! file loads unchanged. Settings can also be assembled from environment
//! variables (with optional `.env` support) and adjusted with explicit
//! overrides. The explainer only ever reads these values.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::Path;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

use crate::llm::{DecodePolicy, ModelFilter};
use crate::locator::ContentRule;
use crate::logging::LogCallback;
use crate::types::{ModelCatalog, ModelDescriptor, ProviderCredentials, ProviderKind};

/// Wall-clock bound applied to every completion request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Longest accepted request timeout.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Local note bridge endpoint (Logseq HTTP API server default).
pub const DEFAULT_NOTE_BRIDGE_URL: &str = "http://127.0.0.1:12315/api";

/// Page the exported explanations are appended to.
pub const DEFAULT_NOTE_PAGE: &str = "AI 解释";

/// Verbosity level for explainer logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Connection details for the local note-taking bridge.
#[derive(Clone, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct NoteBridgeConfig {
    pub url: String,
    pub token: Option<String>,
    pub page: String,
}

impl Default for NoteBridgeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NOTE_BRIDGE_URL.to_string(),
            token: None,
            page: DEFAULT_NOTE_PAGE.to_string(),
        }
    }
}

impl fmt::Debug for NoteBridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteBridgeConfig")
            .field("url", &self.url)
            .field("token_present", &self.token.is_some())
            .field("page", &self.page)
            .finish()
    }
}

/// Everything the explainer reads from persisted configuration.
#[derive(Clone, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct ExplainerSettings {
    #[serde(alias = "deepseekConfig", alias = "deepseekProfile")]
    pub deepseek: ProviderCredentials,
    #[serde(alias = "openaiConfig", alias = "openaiCompatible", alias = "openai")]
    pub openai_compatible: ProviderCredentials,
    #[serde(alias = "selectedModel")]
    pub selected_model: Option<ModelDescriptor>,
    #[serde(alias = "customPrompt")]
    pub custom_prompt: Option<String>,
    #[serde(alias = "customSummaryPrompt")]
    pub custom_summary_prompt: Option<String>,
    #[serde(alias = "modelCatalog", alias = "models")]
    pub model_catalog: ModelCatalog,
    #[serde(alias = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
    #[serde(alias = "streamPolicy")]
    pub stream_policy: DecodePolicy,
    #[serde(alias = "contentRule")]
    pub content_rule: ContentRule,
    #[serde(alias = "noteBridge")]
    pub note_bridge: NoteBridgeConfig,
    #[serde(alias = "modelFilter")]
    pub model_filter: ModelFilter,
    pub verbose: Verbosity,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LogCallback>,
}

impl Default for ExplainerSettings {
    fn default() -> Self {
        Self {
            deepseek: ProviderCredentials::default(),
            openai_compatible: ProviderCredentials::default(),
            selected_model: None,
            custom_prompt: None,
            custom_summary_prompt: None,
            model_catalog: ModelCatalog::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stream_policy: DecodePolicy::default(),
            content_rule: ContentRule::default(),
            note_bridge: NoteBridgeConfig::default(),
            model_filter: ModelFilter::default(),
            verbose: Verbosity::default(),
            logger: None,
        }
    }
}

impl ExplainerSettings {
    /// Construct settings by reading `ZSXQ_*` environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut settings = ExplainerSettings::default();
        settings.apply_env()?;
        Ok(settings)
    }

    /// Load a persisted settings file, then layer environment variables on top.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut settings = Self::from_json_str(&raw)?;
        let _ = dotenv();
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(raw).map_err(|source| ConfigError::InvalidJson {
            field: "settings",
            source,
        })?;
        check_request_timeout("requestTimeoutSecs", settings.request_timeout_secs)?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var("ZSXQ_DEEPSEEK_API_KEY") {
            self.deepseek.api_key = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_OPENAI_API_KEY") {
            self.openai_compatible.api_key = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_OPENAI_BASE_URL") {
            self.openai_compatible.base_url = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_MODEL") {
            self.selected_model = Some(
                parse_model_selection(&value)
                    .ok_or_else(|| ConfigError::invalid_enum("ZSXQ_MODEL", value.clone()))?,
            );
        }

        if let Some(value) = env_var("ZSXQ_PROMPT") {
            self.custom_prompt = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_SUMMARY_PROMPT") {
            self.custom_summary_prompt = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_REQUEST_TIMEOUT_SECS") {
            let secs = parse_u64("ZSXQ_REQUEST_TIMEOUT_SECS", &value)?;
            self.request_timeout_secs = check_request_timeout("ZSXQ_REQUEST_TIMEOUT_SECS", secs)?;
        }

        if let Some(value) = env_var("ZSXQ_STRICT_STREAM") {
            self.stream_policy = if parse_bool("ZSXQ_STRICT_STREAM", &value)? {
                DecodePolicy::Strict
            } else {
                DecodePolicy::Lenient
            };
        }

        if let Some(value) = env_var("ZSXQ_CONTENT_SELECTOR") {
            self.content_rule = ContentRule::parse(&value)
                .ok_or_else(|| ConfigError::invalid_enum("ZSXQ_CONTENT_SELECTOR", value.clone()))?;
        }

        if let Some(value) = env_var("ZSXQ_VERBOSE") {
            let parsed = parse_u8("ZSXQ_VERBOSE", &value)?;
            self.verbose = Verbosity::from_u8(parsed)
                .ok_or_else(|| ConfigError::invalid_enum("ZSXQ_VERBOSE", parsed.to_string()))?;
        }

        if let Some(value) = env_var("ZSXQ_NOTE_BRIDGE_URL") {
            self.note_bridge.url = value;
        }

        if let Some(value) = env_var("ZSXQ_NOTE_BRIDGE_TOKEN") {
            self.note_bridge.token = Some(value);
        }

        if let Some(value) = env_var("ZSXQ_NOTE_PAGE") {
            self.note_bridge.page = value;
        }

        Ok(())
    }

    /// Credential profile for the given provider.
    pub fn credentials(&self, provider: ProviderKind) -> &ProviderCredentials {
        match provider {
            ProviderKind::DeepSeek => &self.deepseek,
            ProviderKind::OpenAiCompatible => &self.openai_compatible,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Create a new settings value with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: SettingsOverrides) -> ExplainerSettings {
        let mut next = self.clone();

        if let Some(value) = overrides.deepseek {
            next.deepseek = value;
        }
        if let Some(value) = overrides.openai_compatible {
            next.openai_compatible = value;
        }
        if let Some(value) = overrides.selected_model {
            next.selected_model = value;
        }
        if let Some(value) = overrides.custom_prompt {
            next.custom_prompt = value;
        }
        if let Some(value) = overrides.custom_summary_prompt {
            next.custom_summary_prompt = value;
        }
        if let Some(value) = overrides.model_catalog {
            next.model_catalog = value;
        }
        if let Some(value) = overrides.request_timeout_secs {
            next.request_timeout_secs = value;
        }
        if let Some(value) = overrides.stream_policy {
            next.stream_policy = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }

        next
    }
}

/// Field-level overrides for [`ExplainerSettings::with_overrides`].
#[derive(Default, Clone)]
pub struct SettingsOverrides {
    pub deepseek: Option<ProviderCredentials>,
    pub openai_compatible: Option<ProviderCredentials>,
    pub selected_model: Option<Option<ModelDescriptor>>,
    pub custom_prompt: Option<Option<String>>,
    pub custom_summary_prompt: Option<Option<String>>,
    pub model_catalog: Option<ModelCatalog>,
    pub request_timeout_secs: Option<u64>,
    pub stream_policy: Option<DecodePolicy>,
    pub verbose: Option<Verbosity>,
    pub logger: Option<Option<LogCallback>>,
}

impl SettingsOverrides {
    pub fn selected_model<T: Into<Option<ModelDescriptor>>>(mut self, model: T) -> Self {
        self.selected_model = Some(model.into());
        self
    }

    pub fn custom_prompt<T: Into<Option<String>>>(mut self, prompt: T) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }
}

impl fmt::Debug for ExplainerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplainerSettings")
            .field("deepseek", &self.deepseek)
            .field("openai_compatible", &self.openai_compatible)
            .field("selected_model", &self.selected_model)
            .field("custom_prompt", &self.custom_prompt.is_some())
            .field("custom_summary_prompt", &self.custom_summary_prompt.is_some())
            .field("model_catalog", &self.model_catalog)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream_policy", &self.stream_policy)
            .field("content_rule", &self.content_rule)
            .field("note_bridge", &self.note_bridge)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for SettingsOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsOverrides")
            .field("selected_model", &self.selected_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream_policy", &self.stream_policy)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .finish()
    }
}

/// Errors that can arise while constructing [`ExplainerSettings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ConfigError::InvalidEnumVariant { field, value }
    }
}

/// Parse a `provider:model-id` selection such as `deepseek:deepseek-chat`.
pub fn parse_model_selection(value: &str) -> Option<ModelDescriptor> {
    let (provider, model) = value.split_once(':')?;
    let provider = ProviderKind::parse(provider)?;
    let model = model.trim();
    if model.is_empty() {
        return None;
    }
    Some(ModelDescriptor::new(model, provider))
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn check_request_timeout(field: &'static str, secs: u64) -> Result<u64, ConfigError> {
    if (1..=MAX_REQUEST_TIMEOUT_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: secs,
            min: 1,
            max: MAX_REQUEST_TIMEOUT_SECS,
        })
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}
