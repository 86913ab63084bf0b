use thiserror::Error;

use crate::transport::TransportError;
use crate::types::ProviderKind;

/// Configuration problems detected before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no model selected; choose a model in the settings first")]
    NoModelSelected,
    #[error("missing API key for {provider}; configure it in the settings first")]
    MissingCredential { provider: ProviderKind },
}

/// Failures of a streamed chat completion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("network error{}: {message}", fmt_status(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },
    #[error("request timed out after {secs} seconds")]
    Timeout { secs: u64 },
    #[error("malformed stream: {message}")]
    Protocol { message: String },
    #[error("provider reported an error: {message}")]
    Remote { message: String },
    #[error("invalid chat completion request: {0}")]
    InvalidRequest(String),
}

impl CompletionError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Unauthorized { status, .. } => Some(*status),
            CompletionError::Network { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionError::Timeout { .. })
    }
}

impl From<TransportError> for CompletionError {
    fn from(err: TransportError) -> Self {
        CompletionError::Network {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Failures while listing a provider's models.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("missing API key for {provider}")]
    MissingCredential { provider: ProviderKind },
    #[error("failed to fetch {provider} models{}: {message}", fmt_status(.status))]
    FetchError {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (HTTP {code})"))
        .unwrap_or_default()
}
