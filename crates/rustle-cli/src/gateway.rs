//! `rustle gateway` — the full runtime.
//!
//! Wiring order: bus → provider → scheduler → agent loop → channels →
//! heartbeat, then everything runs concurrently under one `select!` with
//! Ctrl-C driving the shutdown path (heartbeat, cron, channels, in that
//! order).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use rustle_agent::agent_loop::{AgentLoop, AgentLoopOptions};
use rustle_channels::ChannelManager;
use rustle_core::bus::queue::MessageBus;
use rustle_core::config::load_config;
use rustle_core::session::SessionStore;
use rustle_cron::{CronService, HeartbeatService};
use rustle_providers::create_provider;
use rustle_providers::traits::LlmRequestConfig;

use crate::helpers;

pub async fn run() -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  mode: gateway");
    println!();

    let config = load_config(None);
    let defaults = &config.agents.defaults;

    let workspace = rustle_core::utils::expand_home(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    // One bus shared by everything.
    let bus = Arc::new(MessageBus::new(100));

    let providers_map = config.providers.to_map();
    let provider = create_provider(&defaults.model, &providers_map)?;

    let sessions = SessionStore::new(None).context("failed to open session store")?;

    // Scheduler first: the agent loop registers the cron tool against it.
    let cron_service = Arc::new(CronService::new(bus.clone(), None));
    if let Err(e) = cron_service.load().await {
        tracing::warn!(error = %e, "cron store could not be pre-loaded");
    }
    let cron_jobs = cron_service.list_jobs().await;

    let agent_loop = Arc::new(AgentLoop::new(
        bus.clone(),
        Arc::new(provider),
        workspace.clone(),
        Some(sessions),
        Some(cron_service.clone()),
        AgentLoopOptions {
            model: Some(defaults.model.clone()),
            max_iterations: Some(defaults.max_tool_iterations as usize),
            request_config: Some(LlmRequestConfig {
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
            }),
            brave_api_key: helpers::nonempty(&config.tools.web.search.api_key),
            exec_timeout_secs: Some(config.tools.exec.timeout),
            restrict_to_workspace: config.tools.restrict_to_workspace,
            ..Default::default()
        },
    )?);

    let channel_manager = Arc::new(ChannelManager::from_config(&config.channels, bus.clone()));

    let heartbeat = Arc::new(HeartbeatService::new(
        workspace.clone(),
        bus.clone(),
        Some(config.heartbeat.interval_minutes * 60),
        config.heartbeat.enabled,
    ));

    info!(
        model = %defaults.model,
        workspace = %workspace.display(),
        channels = ?channel_manager.channel_names(),
        "gateway starting"
    );

    println!("  model:     {}", defaults.model);
    println!("  workspace: {}", workspace.display());
    println!("  channels:  {} registered", channel_manager.len());
    if !cron_jobs.is_empty() {
        let enabled = cron_jobs.iter().filter(|j| j.enabled).count();
        println!("  cron:      {} jobs ({enabled} enabled)", cron_jobs.len());
    }
    if config.heartbeat.enabled {
        println!("  heartbeat: every {}m", config.heartbeat.interval_minutes);
    }
    println!();

    if channel_manager.is_empty() {
        println!("  no channels enabled — the agent loop still serves the");
        println!("  scheduler and any bus producers. Enable channels in");
        println!("  ~/.rustle/config.json");
        println!();
    }

    println!("  Ctrl+C to stop");
    println!();

    tokio::select! {
        _ = agent_loop.run() => {
            info!("agent loop exited");
        }
        result = channel_manager.start_all() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "channel manager error");
            }
        }
        result = cron_service.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cron service error");
            }
        }
        result = heartbeat.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "heartbeat error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  shutting down...");
            heartbeat.stop();
            cron_service.stop();
            channel_manager.stop_all().await;
        }
    }

    println!("  gateway stopped");
    Ok(())
}
