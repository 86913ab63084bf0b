use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The two supported completion backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "openai", alias = "openai_compatible", alias = "openaiCompatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::DeepSeek, ProviderKind::OpenAiCompatible];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::OpenAiCompatible => "openai",
        }
    }

    /// Human readable label used in logs and error messages.
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "DeepSeek",
            ProviderKind::OpenAiCompatible => "OpenAI-compatible",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Some(ProviderKind::DeepSeek),
            "openai" | "openai_compatible" | "openai-compatible" => {
                Some(ProviderKind::OpenAiCompatible)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Credential profile persisted for one provider.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
}

impl ProviderCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The API key, treating blank values as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key_present", &self.api_key().is_some())
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A callable model reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(alias = "displayName", alias = "name")]
    pub display_name: String,
    pub provider: ProviderKind,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, provider: ProviderKind) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider,
        }
    }
}

/// Provider → models, each list kept in server-reported order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    entries: BTreeMap<ProviderKind, Vec<ModelDescriptor>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn models(&self, provider: ProviderKind) -> &[ModelDescriptor] {
        self.entries
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replace the list for one provider, leaving the other untouched.
    pub fn replace(&mut self, provider: ProviderKind, models: Vec<ModelDescriptor>) {
        self.entries.insert(provider, models);
    }

    pub fn find(&self, provider: ProviderKind, id: &str) -> Option<&ModelDescriptor> {
        self.models(provider).iter().find(|model| model.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_kind_uses_storage_names() {
        assert_eq!(
            serde_json::to_value(ProviderKind::OpenAiCompatible).unwrap(),
            json!("openai")
        );
        let parsed: ProviderKind = serde_json::from_value(json!("deepseek")).unwrap();
        assert_eq!(parsed, ProviderKind::DeepSeek);
        assert_eq!(
            ProviderKind::parse("OpenAI-Compatible"),
            Some(ProviderKind::OpenAiCompatible)
        );
        assert_eq!(ProviderKind::parse("anthropic"), None);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let creds = ProviderCredentials::new("   ");
        assert!(creds.api_key().is_none());
        assert!(!format!("{creds:?}").contains("   "));
    }

    #[test]
    fn selected_model_accepts_extension_field_names() {
        let model: ModelDescriptor = serde_json::from_value(json!({
            "id": "deepseek-chat",
            "name": "DeepSeek Chat",
            "provider": "deepseek"
        }))
        .unwrap();
        assert_eq!(model.display_name, "DeepSeek Chat");
        assert_eq!(model.provider, ProviderKind::DeepSeek);
    }

    #[test]
    fn catalog_keeps_insertion_order_per_provider() {
        let mut catalog = ModelCatalog::new();
        catalog.replace(
            ProviderKind::OpenAiCompatible,
            vec![
                ModelDescriptor::new("gpt-4o-mini", ProviderKind::OpenAiCompatible),
                ModelDescriptor::new("gpt-4o", ProviderKind::OpenAiCompatible),
            ],
        );
        let ids: Vec<_> = catalog
            .models(ProviderKind::OpenAiCompatible)
            .iter()
            .map(|model| model.id.as_str())
            .collect();
        assert_eq!(ids, ["gpt-4o-mini", "gpt-4o"]);
        assert!(catalog.models(ProviderKind::DeepSeek).is_empty());
        assert!(catalog.find(ProviderKind::OpenAiCompatible, "gpt-4o").is_some());
    }
}
