//! Static provider registry — model-name → provider routing.
//!
//! Each [`ProviderSpec`] describes one backend: the keywords that match its
//! model names, the env var carrying its key, prefixing quirks, and whether
//! it is a gateway (aggregator) usable as a fallback for unknown models.

use std::collections::HashMap;

pub use rustle_core::config::schema::ProviderConfig;

/// Why a provider could not be selected.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(
        "no configured provider for model '{0}' — set the matching API key \
         (e.g. ANTHROPIC_API_KEY, OPENROUTER_API_KEY) or add it to config.json"
    )]
    NoProvider(String),
}

// ─────────────────────────────────────────────
// ProviderSpec
// ─────────────────────────────────────────────

/// Static description of one LLM backend.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Registry name, matching the config key (e.g. `"deepseek"`).
    pub name: &'static str,
    /// Lowercase substrings that identify this provider's models.
    pub keywords: &'static [&'static str],
    /// Env var holding the API key.
    pub env_key: &'static str,
    /// Name for logs.
    pub display_name: &'static str,
    /// Prefix prepended to model names for API routing (e.g. `"deepseek"` →
    /// `"deepseek/deepseek-chat"`).
    pub prefix: Option<&'static str>,
    /// If the model already starts with one of these, do not re-prefix.
    pub skip_prefixes: &'static [&'static str],
    /// Gateway/aggregator: used as the fallback when no direct match exists.
    pub is_gateway: bool,
    /// Self-hosted backend (never matched by keyword fallback).
    pub is_local: bool,
    /// Auto-detect this provider when the API key starts with this prefix.
    pub detect_by_key_prefix: Option<&'static str>,
    /// Auto-detect when the API base URL contains this substring.
    pub detect_by_base_keyword: Option<&'static str>,
    /// Default API base for non-standard endpoints.
    pub default_api_base: Option<&'static str>,
}

/// Supported providers in matching priority order.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openrouter",
        keywords: &["openrouter"],
        env_key: "OPENROUTER_API_KEY",
        display_name: "OpenRouter",
        prefix: Some("openrouter"),
        skip_prefixes: &["openrouter/"],
        is_gateway: true,
        is_local: false,
        detect_by_key_prefix: Some("sk-or-"),
        detect_by_base_keyword: Some("openrouter"),
        default_api_base: Some("https://openrouter.ai/api/v1"),
    },
    ProviderSpec {
        name: "anthropic",
        keywords: &["anthropic", "claude"],
        env_key: "ANTHROPIC_API_KEY",
        display_name: "Anthropic",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
    ProviderSpec {
        name: "openai",
        keywords: &["openai", "gpt"],
        env_key: "OPENAI_API_KEY",
        display_name: "OpenAI",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
    ProviderSpec {
        name: "deepseek",
        keywords: &["deepseek"],
        env_key: "DEEPSEEK_API_KEY",
        display_name: "DeepSeek",
        prefix: Some("deepseek"),
        skip_prefixes: &["deepseek/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
    ProviderSpec {
        name: "gemini",
        keywords: &["gemini"],
        env_key: "GEMINI_API_KEY",
        display_name: "Gemini",
        prefix: Some("gemini"),
        skip_prefixes: &["gemini/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
    ProviderSpec {
        name: "groq",
        keywords: &["groq"],
        env_key: "GROQ_API_KEY",
        display_name: "Groq",
        prefix: Some("groq"),
        skip_prefixes: &["groq/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
    ProviderSpec {
        name: "moonshot",
        keywords: &["moonshot", "kimi"],
        env_key: "MOONSHOT_API_KEY",
        display_name: "Moonshot",
        prefix: Some("moonshot"),
        skip_prefixes: &["moonshot/", "openrouter/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: Some("https://api.moonshot.ai/v1"),
    },
    ProviderSpec {
        name: "vllm",
        keywords: &["vllm"],
        env_key: "HOSTED_VLLM_API_KEY",
        display_name: "vLLM",
        prefix: Some("hosted_vllm"),
        skip_prefixes: &["hosted_vllm/"],
        is_gateway: false,
        is_local: true,
        detect_by_key_prefix: None,
        detect_by_base_keyword: None,
        default_api_base: None,
    },
];

// ─────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────

/// Keyword-match a model name to a direct provider. Gateways and local
/// backends are skipped; they are fallbacks, not matches.
pub fn find_by_model(model: &str) -> Option<&'static ProviderSpec> {
    let model_lower = model.to_lowercase();
    PROVIDERS.iter().find(|spec| {
        !spec.is_gateway
            && !spec.is_local
            && spec.keywords.iter().any(|kw| model_lower.contains(kw))
    })
}

/// Exact-name lookup.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

/// Detect a gateway/local provider by name, key prefix, or base URL keyword.
pub fn find_gateway(
    provider_name: Option<&str>,
    api_key: Option<&str>,
    api_base: Option<&str>,
) -> Option<&'static ProviderSpec> {
    if let Some(name) = provider_name {
        if let Some(spec) = PROVIDERS
            .iter()
            .find(|s| s.name == name && (s.is_gateway || s.is_local))
        {
            return Some(spec);
        }
    }
    if let Some(key) = api_key {
        if let Some(spec) = PROVIDERS
            .iter()
            .find(|s| s.detect_by_key_prefix.is_some_and(|p| key.starts_with(p)))
        {
            return Some(spec);
        }
    }
    if let Some(base) = api_base {
        let base_lower = base.to_lowercase();
        if let Some(spec) = PROVIDERS.iter().find(|s| {
            s.detect_by_base_keyword
                .is_some_and(|kw| base_lower.contains(kw))
        }) {
            return Some(spec);
        }
    }
    None
}

/// Apply the spec's prefixing rules to a model name.
pub fn resolve_model_name(model: &str, spec: &ProviderSpec) -> String {
    if let Some(prefix) = spec.prefix {
        let already = spec.skip_prefixes.iter().any(|sp| model.starts_with(sp));
        if !already {
            return format!("{prefix}/{model}");
        }
    }
    model.to_string()
}

/// Pick the provider for a model: keyword match against configured
/// providers first, then the first configured gateway.
pub fn match_provider<'a>(
    model: &str,
    providers: &'a HashMap<String, ProviderConfig>,
) -> Option<(&'a ProviderConfig, &'static ProviderSpec)> {
    if let Some(spec) = find_by_model(model) {
        if let Some(config) = providers.get(spec.name) {
            if config.is_configured() {
                return Some((config, spec));
            }
        }
    }

    PROVIDERS.iter().filter(|s| s.is_gateway).find_map(|spec| {
        providers
            .get(spec.name)
            .filter(|c| c.is_configured())
            .map(|c| (c, spec))
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
