//! Explain and summarise community posts with streamed LLM completions.
//!
//! The pieces, bottom up:
//!
//! - [`locator`] finds the content block under a point on a page
//!   ([`dom_snapshot`] and [`runtime`] supply pages to it).
//! - [`llm`] resolves the provider and model from [`config`], then streams a
//!   chat completion as text fragments under one wall-clock deadline.
//! - [`session`] drives one explanation into a [`surface`], making sure only
//!   the newest session ever writes to the screen.
//! - [`export`] and [`harvest`] consume finished sessions and collected blocks.

pub mod config;
pub mod dom_scripts;
pub mod dom_snapshot;
pub mod export;
pub mod harvest;
pub mod llm;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod surface;
pub mod transport;
pub mod types;

pub use config::{ExplainerSettings, Verbosity};
pub use export::{ExportError, NoteBridge};
pub use harvest::{ContentHarvester, HarvestedBlock};
pub use llm::{CompletionError, PromptMode, ResolveError};
pub use locator::{ContentLocator, ContentRule, LocateError};
pub use session::{Explainer, ExplanationSession, SessionHandle, SessionSnapshot, SessionState};
pub use surface::PresentationSurface;
pub use transport::{HttpTransport, ReqwestTransport};
