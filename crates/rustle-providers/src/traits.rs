//! The provider interface.

use async_trait::async_trait;
use rustle_core::types::{LlmResponse, Message, ToolDefinition};

/// Per-call generation settings.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// The single seam between the agent loop and any LLM backend.
///
/// `chat` never raises: transport and API failures come back as an
/// [`LlmResponse`] carrying the diagnostic as content with
/// `finish_reason = "error"`, so the loop exits normally and the user sees
/// what happened.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Name for logs.
    fn display_name(&self) -> &str;
}
