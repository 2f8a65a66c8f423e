//! LLM provider layer.
//!
//! - [`traits::LlmProvider`] — the one interface the agent loop talks to
//! - [`registry`] — static provider specs + model-name → provider matching
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible HTTP client

pub mod http_provider;
pub mod registry;
pub mod traits;

pub use http_provider::{create_provider, HttpProvider};
pub use registry::{ProviderError, ProviderSpec, PROVIDERS};
pub use traits::{LlmProvider, LlmRequestConfig};
