//! The `rustle` binary.
//!
//! - `rustle agent [-m MESSAGE]` — one-shot chat, or a REPL without `-m`
//! - `rustle gateway` — the full runtime: bus, channels, agent, scheduler
//! - `rustle cron add|list|remove` — manage scheduled jobs
//! - `rustle status` — configuration overview

mod cron_cmd;
mod gateway;
mod helpers;
mod repl;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rustle_agent::agent_loop::{AgentLoop, AgentLoopOptions};
use rustle_core::bus::queue::MessageBus;
use rustle_core::config::{load_config, Config};
use rustle_core::session::SessionStore;
use rustle_providers::create_provider;
use rustle_providers::traits::LlmRequestConfig;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Rustle — a multi-channel AI agent runtime
#[derive(Parser)]
#[command(name = "rustle", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (one-shot with -m, REPL otherwise)
    Agent {
        /// Single message; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Session identifier ("channel:id")
        #[arg(short, long, default_value = "cli:direct")]
        session: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Run the full runtime: channels + agent loop + scheduler
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        action: cron_cmd::CronCommands,
    },

    /// Show configuration and provider status
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            session,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, session).await
        }
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Cron { action } => {
            init_logging(false);
            cron_cmd::dispatch(action).await
        }
        Commands::Status => status::run(),
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(message: Option<String>, session: String) -> Result<()> {
    let config = load_config(None);
    let agent = build_agent_loop(&config)?;

    match message {
        Some(text) => {
            info!(session = %session, "one-shot message");
            let response = agent
                .process_direct(&text)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response);
            Ok(())
        }
        None => repl::run(agent).await,
    }
}

/// Shared construction path for `agent` mode (the gateway has its own
/// wiring including the scheduler).
pub fn build_agent_loop(config: &Config) -> Result<AgentLoop> {
    let defaults = &config.agents.defaults;

    let workspace = rustle_core::utils::expand_home(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    let providers_map = config.providers.to_map();
    let provider = create_provider(&defaults.model, &providers_map)?;

    let bus = Arc::new(MessageBus::new(100));
    let sessions = SessionStore::new(None).context("failed to open session store")?;

    AgentLoop::new(
        bus,
        Arc::new(provider),
        workspace,
        Some(sessions),
        None,
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
    )
}

/// Tracing subscriber setup shared by every subcommand.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("rustle=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
