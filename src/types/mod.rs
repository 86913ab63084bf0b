//! Shared vocabulary for providers, models, and page geometry.

pub mod page;
pub mod provider;

pub use page::{ContentPoint, Rect};
pub use provider::{ModelCatalog, ModelDescriptor, ProviderCredentials, ProviderKind};
