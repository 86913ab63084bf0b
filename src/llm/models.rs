//! Model catalogue synchronisation.
//!
//! Lists a provider's models once at configuration time and keeps only
//! chat-capable ids. Nothing here touches the streaming path.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{ModelCatalog, ModelDescriptor, ProviderCredentials, ProviderKind};

use super::backend::{backend_for, remote_error_message};
use super::error::RegistryError;

const DEFAULT_EXCLUDED: &[&str] = &["image", "embedding", "vision", "dall-e", "tts", "whisper"];

/// Case-insensitive id substrings that mark a model as not chat-capable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFilter {
    #[serde(alias = "excludedSubstrings", alias = "exclude")]
    pub excluded_substrings: Vec<String>,
}

impl Default for ModelFilter {
    fn default() -> Self {
        Self {
            excluded_substrings: DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ModelFilter {
    pub fn allow_all() -> Self {
        Self {
            excluded_substrings: Vec::new(),
        }
    }

    pub fn allows(&self, model_id: &str) -> bool {
        let id = model_id.to_ascii_lowercase();
        !self
            .excluded_substrings
            .iter()
            .any(|needle| !needle.is_empty() && id.contains(&needle.to_ascii_lowercase()))
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub struct ModelRegistry<T: HttpTransport> {
    transport: T,
    filter: ModelFilter,
    timeout: Duration,
}

impl<T: HttpTransport> ModelRegistry<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            filter: ModelFilter::default(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_filter(mut self, filter: ModelFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch `provider`'s model list, in server order, minus filtered ids.
    pub async fn sync(
        &self,
        provider: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<Vec<ModelDescriptor>, RegistryError> {
        let api_key = credentials
            .api_key()
            .ok_or(RegistryError::MissingCredential { provider })?;
        let backend = backend_for(provider, api_key, credentials.base_url());
        let (header, value) = backend.auth_header();
        let request = HttpRequest::get(backend.models_endpoint()).header(header, value);

        let fetch_error = |status: Option<u16>, message: String| RegistryError::FetchError {
            provider,
            status,
            message,
        };

        let response = timeout(self.timeout, self.transport.execute(request))
            .await
            .map_err(|_| fetch_error(None, "request timed out".into()))?
            .map_err(|err| fetch_error(None, err.to_string()))?;
        let status = response.status;
        let success = response.is_success();
        let text = timeout(self.timeout, response.text())
            .await
            .map_err(|_| fetch_error(Some(status), "response timed out".into()))?
            .map_err(|err| fetch_error(Some(status), err.to_string()))?;

        if !success {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|value| value.get("error").map(remote_error_message))
                .unwrap_or_else(|| "model listing request was rejected".to_string());
            return Err(fetch_error(Some(status), message));
        }

        let listing: ModelsResponse = serde_json::from_str(&text)
            .map_err(|err| fetch_error(Some(status), format!("invalid model listing: {err}")))?;

        let models: Vec<ModelDescriptor> = listing
            .data
            .into_iter()
            .filter(|entry| self.filter.allows(&entry.id))
            .map(|entry| ModelDescriptor::new(entry.id, provider))
            .collect();

        info!("synced {} {} models", models.len(), provider.label());
        Ok(models)
    }

    /// Sync one provider and replace its entry in `catalog`.
    pub async fn sync_into(
        &self,
        catalog: &mut ModelCatalog,
        provider: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<usize, RegistryError> {
        let models = self.sync(provider, credentials).await?;
        let count = models.len();
        catalog.replace(provider, models);
        Ok(count)
    }
}
