//! Config loading: defaults ← `~/.rustle/config.json` ← `RUSTLE_*` env vars.
//!
//! A missing or corrupt file degrades to defaults with a warning; the rest of
//! the process keeps running.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ProviderConfig};

/// Default config file path, `~/.rustle/config.json`.
pub fn config_path() -> PathBuf {
    crate::utils::data_dir().join("config.json")
}

/// Load configuration from `path` (or the default location) and apply env
/// overrides.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(config_path);
    load_from_path(&config_path)
}

fn load_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return apply_env_overrides(Config::default());
    }

    debug!(path = %path.display(), "loading config");
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            return apply_env_overrides(Config::default());
        }
    };

    // Parse to a raw Value first so legacy shapes can be migrated.
    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "config is not valid JSON, using defaults");
            return apply_env_overrides(Config::default());
        }
    };

    migrate_config(&mut raw);

    let config: Config = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "config did not match schema, using defaults");
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Write the config back as pretty JSON (camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(config_path);
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(&config_path, json)?;
    debug!(path = %config_path.display(), "config saved");
    Ok(())
}

/// Relocate obsolete keys before typed deserialization.
///
/// `tools.exec.restrictToWorkspace` → `tools.restrictToWorkspace` (never
/// overwriting an explicit value at the new location).
fn migrate_config(raw: &mut serde_json::Value) {
    if let Some(tools) = raw.get_mut("tools") {
        if let Some(restrict) = tools
            .get("exec")
            .and_then(|exec| exec.get("restrictToWorkspace"))
            .cloned()
        {
            if tools.get("restrictToWorkspace").is_none() {
                tools["restrictToWorkspace"] = restrict;
                debug!("migrated tools.exec.restrictToWorkspace → tools.restrictToWorkspace");
            }
        }
    }
}

/// `RUSTLE_<SECTION>__<FIELD>` env overrides, applied last.
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("RUSTLE_AGENTS__DEFAULTS__MODEL") {
        config.agents.defaults.model = val;
    }
    if let Ok(val) = std::env::var("RUSTLE_AGENTS__DEFAULTS__WORKSPACE") {
        config.agents.defaults.workspace = val;
    }
    if let Ok(val) = std::env::var("RUSTLE_AGENTS__DEFAULTS__MAX_TOKENS") {
        if let Ok(n) = val.parse() {
            config.agents.defaults.max_tokens = n;
        }
    }
    if let Ok(val) = std::env::var("RUSTLE_AGENTS__DEFAULTS__TEMPERATURE") {
        if let Ok(t) = val.parse() {
            config.agents.defaults.temperature = t;
        }
    }
    if let Ok(val) = std::env::var("RUSTLE_AGENTS__DEFAULTS__MAX_TOOL_ITERATIONS") {
        if let Ok(n) = val.parse() {
            config.agents.defaults.max_tool_iterations = n;
        }
    }

    apply_provider_env(&mut config.providers.anthropic, "ANTHROPIC");
    apply_provider_env(&mut config.providers.openai, "OPENAI");
    apply_provider_env(&mut config.providers.openrouter, "OPENROUTER");
    apply_provider_env(&mut config.providers.deepseek, "DEEPSEEK");
    apply_provider_env(&mut config.providers.gemini, "GEMINI");
    apply_provider_env(&mut config.providers.groq, "GROQ");
    apply_provider_env(&mut config.providers.moonshot, "MOONSHOT");
    apply_provider_env(&mut config.providers.vllm, "VLLM");

    if let Ok(val) = std::env::var("RUSTLE_TOOLS__RESTRICT_TO_WORKSPACE") {
        config.tools.restrict_to_workspace = val == "true" || val == "1";
    }

    config
}

fn apply_provider_env(provider: &mut ProviderConfig, name: &str) {
    if let Ok(val) = std::env::var(format!("RUSTLE_PROVIDERS__{name}__API_KEY")) {
        provider.api_key = val;
    }
    if let Ok(val) = std::env::var(format!("RUSTLE_PROVIDERS__{name}__API_BASE")) {
        provider.api_base = Some(val);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
