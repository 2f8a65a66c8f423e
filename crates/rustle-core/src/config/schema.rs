//! Typed configuration schema.
//!
//! On-disk JSON uses camelCase keys; every section has working defaults so a
//! partial (or missing) file still yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.rustle/config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub channels: ChannelsConfig,
    pub tools: ToolsConfig,
    pub heartbeat: HeartbeatConfig,
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Agent workspace directory.
    pub workspace: String,
    /// LLM model identifier.
    pub model: String,
    /// Max tokens per response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Max LLM ↔ tool iterations per message.
    pub max_tool_iterations: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.rustle/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Credentials and endpoint overrides for one LLM provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers sent with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// One entry per supported LLM backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub deepseek: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub groq: ProviderConfig,
    #[serde(default)]
    pub moonshot: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
}

impl ProvidersConfig {
    /// Flatten to name → config for the provider registry.
    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let entries: &[(&str, &ProviderConfig)] = &[
            ("anthropic", &self.anthropic),
            ("openai", &self.openai),
            ("openrouter", &self.openrouter),
            ("deepseek", &self.deepseek),
            ("gemini", &self.gemini),
            ("groq", &self.groq),
            ("moonshot", &self.moonshot),
            ("vllm", &self.vllm),
        ];
        entries
            .iter()
            .map(|(name, cfg)| (name.to_string(), (*cfg).clone()))
            .collect()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "openrouter" => Some(&self.openrouter),
            "deepseek" => Some(&self.deepseek),
            "gemini" => Some(&self.gemini),
            "groq" => Some(&self.groq),
            "moonshot" => Some(&self.moonshot),
            "vllm" => Some(&self.vllm),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Telegram bot via long polling.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bot token from @BotFather.
    #[serde(default)]
    pub token: String,
    /// Allowed sender ids/usernames. Empty = allow everyone.
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// Generic WebSocket bridge (external process speaks the platform protocol).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bridge WebSocket URL, e.g. `ws://localhost:3001`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub web: WebToolsConfig,
    #[serde(default)]
    pub exec: ExecToolConfig,
    /// Restrict filesystem/exec tools to the workspace directory.
    #[serde(default)]
    pub restrict_to_workspace: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebToolsConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
}

/// Brave Search API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub api_key: String,
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

/// Shell exec settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecToolConfig {
    /// Timeout in seconds.
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────

/// Periodic self-trigger settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Minutes between heartbeat ticks.
    pub interval_minutes: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.agents.defaults.max_tokens, 8192);
        assert_eq!(cfg.agents.defaults.max_tool_iterations, 20);
        assert_eq!(cfg.heartbeat.interval_minutes, 30);
        assert!(cfg.heartbeat.enabled);
        assert!(!cfg.tools.restrict_to_workspace);
        assert!(!cfg.channels.telegram.enabled);
    }

    #[test]
    fn camel_case_keys_on_disk() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["agents"]["defaults"].get("maxTokens").is_some());
        assert!(json["agents"]["defaults"].get("max_tokens").is_none());
        assert!(json["tools"].get("restrictToWorkspace").is_some());
        assert!(json["heartbeat"].get("intervalMinutes").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "agents": {"defaults": {"model": "gpt-4o", "maxTokens": 2048}}
        }))
        .unwrap();
        assert_eq!(cfg.agents.defaults.model, "gpt-4o");
        assert_eq!(cfg.agents.defaults.max_tokens, 2048);
        assert_eq!(cfg.agents.defaults.temperature, 0.7);
    }

    #[test]
    fn channel_allow_from_parses() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "channels": {
                "telegram": {
                    "enabled": true,
                    "token": "bot:abc",
                    "allowFrom": ["alice", "bob"]
                },
                "bridge": {"enabled": true, "url": "ws://localhost:3001"}
            }
        }))
        .unwrap();
        assert!(cfg.channels.telegram.enabled);
        assert_eq!(cfg.channels.telegram.allow_from, vec!["alice", "bob"]);
        assert!(cfg.channels.bridge.enabled);
        assert!(cfg.channels.bridge.allow_from.is_empty());
    }

    #[test]
    fn providers_map_has_all_backends() {
        let mut cfg = ProvidersConfig::default();
        cfg.deepseek.api_key = "ds-1".into();
        let map = cfg.to_map();
        assert_eq!(map.len(), 8);
        assert!(map["deepseek"].is_configured());
        assert!(!map["openai"].is_configured());
    }

    #[test]
    fn provider_lookup_by_name() {
        let mut cfg = ProvidersConfig::default();
        cfg.groq.api_key = "g".into();
        assert!(cfg.get_by_name("groq").unwrap().is_configured());
        assert!(cfg.get_by_name("nope").is_none());
    }

    #[test]
    fn round_trip() {
        let mut cfg = Config::default();
        cfg.agents.defaults.model = "deepseek-chat".into();
        cfg.channels.bridge.url = "ws://bridge:9100".into();
        let text = serde_json::to_string_pretty(&cfg).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.agents.defaults.model, "deepseek-chat");
        assert_eq!(back.channels.bridge.url, "ws://bridge:9100");
    }

    #[test]
    fn tools_section_parses() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "tools": {
                "web": {"search": {"apiKey": "brave-1", "maxResults": 8}},
                "exec": {"timeout": 120},
                "restrictToWorkspace": true
            }
        }))
        .unwrap();
        assert_eq!(cfg.tools.web.search.api_key, "brave-1");
        assert_eq!(cfg.tools.web.search.max_results, 8);
        assert_eq!(cfg.tools.exec.timeout, 120);
        assert!(cfg.tools.restrict_to_workspace);
    }
}
