//! Generic HTTP provider for OpenAI-compatible `/chat/completions` APIs.
//!
//! One implementation covers every backend in the registry; the spec supplies
//! the endpoint and model-prefixing quirks, the user config supplies
//! credentials.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, warn};

use rustle_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::registry::{match_provider, resolve_model_name, ProviderConfig, ProviderError, ProviderSpec};
use crate::traits::{LlmProvider, LlmRequestConfig};

/// LLM calls get a generous but bounded timeout.
const LLM_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// Talks to any OpenAI-compatible chat completions endpoint.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
    extra_headers: HeaderMap,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Build a provider from user config + static spec.
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec, model: &str) -> Self {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.default_api_base.map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(headers) = &config.extra_headers {
            for (key, value) in headers {
                match (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(val)) => {
                        extra_headers.insert(name, val);
                    }
                    _ => warn!(header = key, "ignoring invalid extra header"),
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            extra_headers,
            spec,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        let resolved_model = resolve_model_name(model, self.spec);

        debug!(
            provider = self.spec.display_name,
            model = %resolved_model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let body = ChatCompletionRequest {
            model: resolved_model,
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let result = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "LLM request failed");
                return LlmResponse::error(format!("Error calling LLM: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(unreadable error body)".to_string());
            error!(
                provider = self.spec.display_name,
                status = %status,
                body = %body,
                "LLM API error"
            );
            return LlmResponse::error(format!("Error calling LLM: {status} — {body}"));
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(raw) => {
                let resp: LlmResponse = raw.into();
                debug!(
                    provider = self.spec.display_name,
                    tool_calls = resp.tool_calls.len(),
                    finish_reason = resp.finish_reason.as_deref().unwrap_or("?"),
                    "LLM response received"
                );
                resp
            }
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "bad LLM response body");
                LlmResponse::error(format!("Error parsing LLM response: {e}"))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

/// Match `model` against the configured providers and build an
/// [`HttpProvider`] for it.
pub fn create_provider(
    model: &str,
    providers: &std::collections::HashMap<String, ProviderConfig>,
) -> Result<HttpProvider, ProviderError> {
    let (config, spec) = match_provider(model, providers)
        .ok_or_else(|| ProviderError::NoProvider(model.to_string()))?;

    debug!(
        provider = spec.display_name,
        model = model,
        api_base = config.api_base.as_deref().unwrap_or("default"),
        "creating LLM provider"
    );

    Ok(HttpProvider::new(config, spec, model))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::find_by_name;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            extra_headers: None,
        }
    }

    #[test]
    fn completions_url_handles_trailing_slash() {
        let spec = find_by_name("openai").unwrap();
        let p = HttpProvider::new(&make_config("k", Some("https://x.test/v1/")), spec, "gpt-4o");
        assert_eq!(p.completions_url(), "https://x.test/v1/chat/completions");
        let p = HttpProvider::new(&make_config("k", Some("https://x.test/v1")), spec, "gpt-4o");
        assert_eq!(p.completions_url(), "https://x.test/v1/chat/completions");
    }

    #[test]
    fn gateway_default_base_applies() {
        let spec = find_by_name("openrouter").unwrap();
        let p = HttpProvider::new(&make_config("sk-or-1", None), spec, "meta-llama/llama-3");
        assert_eq!(p.api_base, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn config_base_overrides_default() {
        let spec = find_by_name("openrouter").unwrap();
        let p = HttpProvider::new(
            &make_config("sk-or-1", Some("https://proxy.test/v1")),
            spec,
            "x",
        );
        assert_eq!(p.api_base, "https://proxy.test/v1");
    }

    #[test]
    fn extra_headers_are_kept() {
        let spec = find_by_name("openai").unwrap();
        let mut headers = HashMap::new();
        headers.insert("X-App-Code".to_string(), "rustle".to_string());
        let config = ProviderConfig {
            api_key: "k".into(),
            api_base: None,
            extra_headers: Some(headers),
        };
        let p = HttpProvider::new(&config, spec, "gpt-4o");
        assert!(p.extra_headers.contains_key("x-app-code"));
    }

    #[tokio::test]
    async fn chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "choices": [{
                    "message": {"content": "Hello from the mock.", "tool_calls": null},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 4, "completion_tokens": 4, "total_tokens": 8}
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("key-123", Some(&server.uri())), spec, "gpt-4o");

        let resp = provider
            .chat(
                &[Message::user("hi")],
                None,
                "gpt-4o",
                &LlmRequestConfig::default(),
            )
            .await;

        assert_eq!(resp.content.as_deref(), Some("Hello from the mock."));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 8);
    }

    #[tokio::test]
    async fn chat_returns_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-2",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": null
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("k", Some(&server.uri())), spec, "gpt-4o");
        let tool = ToolDefinition::new(
            "web_search",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        );

        let resp = provider
            .chat(
                &[Message::user("search rust")],
                Some(&[tool]),
                "gpt-4o",
                &LlmRequestConfig::default(),
            )
            .await;

        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].id, "call_9");
        assert_eq!(resp.tool_calls[0].function.name, "web_search");
    }

    #[tokio::test]
    async fn api_error_becomes_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "rate limited"}
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let provider = HttpProvider::new(&make_config("k", Some(&server.uri())), spec, "gpt-4o");
        let resp = provider
            .chat(&[Message::user("hi")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;

        assert_eq!(resp.finish_reason.as_deref(), Some("error"));
        let content = resp.content.unwrap();
        assert!(content.contains("Error calling LLM"));
        assert!(content.contains("429"));
    }

    #[tokio::test]
    async fn network_error_becomes_error_response() {
        let spec = find_by_name("openai").unwrap();
        let provider =
            HttpProvider::new(&make_config("k", Some("http://127.0.0.1:1")), spec, "gpt-4o");
        let resp = provider
            .chat(&[Message::user("hi")], None, "gpt-4o", &LlmRequestConfig::default())
            .await;
        assert_eq!(resp.finish_reason.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn request_body_carries_resolved_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek/deepseek-chat",
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-3",
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
                "usage": null
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("deepseek").unwrap();
        let provider = HttpProvider::new(&make_config("k", Some(&server.uri())), spec, "deepseek-chat");
        let resp = provider
            .chat(
                &[Message::user("x")],
                None,
                "deepseek-chat",
                &LlmRequestConfig::default(),
            )
            .await;
        // A body mismatch would 404 and turn into an error response.
        assert_eq!(resp.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn reasoning_content_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-4",
                "choices": [{
                    "message": {"content": "42", "reasoning_content": "step by step"},
                    "finish_reason": "stop"
                }],
                "usage": null
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("deepseek").unwrap();
        let provider =
            HttpProvider::new(&make_config("k", Some(&server.uri())), spec, "deepseek-reasoner");
        let resp = provider
            .chat(
                &[Message::user("?")],
                None,
                "deepseek-reasoner",
                &LlmRequestConfig::default(),
            )
            .await;
        assert_eq!(resp.reasoning_content.as_deref(), Some("step by step"));
    }

    #[test]
    fn create_provider_success_and_failure() {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), make_config("sk-ant-1", None));

        let provider = create_provider("claude-sonnet-4-20250514", &providers).unwrap();
        assert_eq!(provider.display_name(), "Anthropic");
        assert_eq!(provider.default_model(), "claude-sonnet-4-20250514");

        let err = create_provider("gpt-4o", &providers).unwrap_err();
        assert!(err.to_string().contains("gpt-4o"));
    }
}
