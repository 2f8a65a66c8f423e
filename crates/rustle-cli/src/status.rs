//! `rustle status` — configuration overview.

use anyhow::Result;
use colored::Colorize;

use rustle_core::config::{config_path, load_config};
use rustle_core::session::SessionStore;
use rustle_providers::registry::match_provider;

pub fn run() -> Result<()> {
    let config = load_config(None);
    let defaults = &config.agents.defaults;

    crate::helpers::print_banner();
    println!();

    println!("  {}   {}", "config:".bold(), config_path().display());
    println!(
        "  {}    {}",
        "model:".bold(),
        defaults.model
    );

    let providers_map = config.providers.to_map();
    match match_provider(&defaults.model, &providers_map) {
        Some((_, spec)) => {
            println!("  {} {} (configured)", "provider:".bold(), spec.display_name)
        }
        None => println!(
            "  {} {}",
            "provider:".bold(),
            "none configured for this model".red()
        ),
    }

    println!(
        "  {}  {}",
        "workspace:".bold(),
        rustle_core::utils::expand_home(&defaults.workspace).display()
    );

    let mut enabled_channels = Vec::new();
    if config.channels.telegram.enabled {
        enabled_channels.push("telegram");
    }
    if config.channels.bridge.enabled {
        enabled_channels.push("bridge");
    }
    println!(
        "  {} {}",
        "channels:".bold(),
        if enabled_channels.is_empty() {
            "none enabled".to_string()
        } else {
            enabled_channels.join(", ")
        }
    );

    if let Ok(store) = SessionStore::new(None) {
        let sessions = store.list_sessions();
        println!("  {} {}", "sessions:".bold(), sessions.len());
        for summary in sessions.iter().take(5) {
            println!(
                "    - {} ({})",
                summary.key,
                crate::helpers::format_age(summary.updated_at.timestamp_millis())
            );
        }
    }

    println!(
        "  {} {}",
        "heartbeat:".bold(),
        if config.heartbeat.enabled {
            format!("every {}m", config.heartbeat.interval_minutes)
        } else {
            "disabled".to_string()
        }
    );
    println!();
    Ok(())
}
