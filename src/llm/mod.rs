//! Provider resolution and streamed chat completions.
//!
//! [`ProviderConfig`] turns persisted settings into a [`ResolvedConfig`],
//! [`StreamingCompletionClient`] opens a [`FragmentStream`] for it, and
//! [`ModelRegistry`] keeps the model catalogue current.

pub mod backend;
pub mod client;
pub mod error;
pub mod models;
pub mod prompts;
pub mod resolve;
pub mod stream;

pub use backend::{
    CompletionBackend, DeepSeekBackend, FrameError, OpenAiCompatibleBackend, StreamFrame,
    normalize_base_url,
};
pub use client::{CompletionRequest, ResponseMode, StreamingCompletionClient};
pub use error::{CompletionError, RegistryError, ResolveError};
pub use models::{ModelFilter, ModelRegistry};
pub use prompts::PromptMode;
pub use resolve::{ProviderConfig, ResolvedConfig};
pub use stream::{DecodePolicy, FragmentStream};
