//! `rustle cron` — manage scheduled jobs from the shell.
//!
//! Operates on the same `cron/jobs.json` the gateway's scheduler reads; the
//! scheduler re-reads the store on startup, so edits here are picked up the
//! next time the gateway runs (or immediately via the cron tool when made
//! from a conversation).

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use rustle_core::bus::queue::MessageBus;
use rustle_cron::{CronJob, CronPayload, CronSchedule, CronService, ScheduleKind};

#[derive(Subcommand)]
pub enum CronCommands {
    /// Add a job
    Add {
        /// Prompt sent to the agent when the job fires
        #[arg(short, long)]
        message: String,

        /// Job name (defaults to the message)
        #[arg(short, long)]
        name: Option<String>,

        /// Fire every N seconds
        #[arg(long, conflicts_with = "cron")]
        every: Option<i64>,

        /// Cron expression (5-field), e.g. "0 9 * * 1-5"
        #[arg(long)]
        cron: Option<String>,

        /// IANA time zone for --cron (default UTC)
        #[arg(long)]
        tz: Option<String>,

        /// Deliver the agent's reply to this channel
        #[arg(long)]
        channel: Option<String>,

        /// Recipient (chat id) on that channel
        #[arg(long)]
        to: Option<String>,

        /// Remove the job after its first run
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// List jobs
    List,

    /// Remove a job by id
    Remove { id: String },
}

pub async fn dispatch(action: CronCommands) -> Result<()> {
    // The CLI drives the store directly; no bus consumer is running here.
    let bus = Arc::new(MessageBus::new(8));
    let service = CronService::new(bus, None);
    service.load().await?;

    match action {
        CronCommands::Add {
            message,
            name,
            every,
            cron,
            tz,
            channel,
            to,
            once,
        } => {
            let schedule = match (every, cron) {
                (Some(secs), _) if secs > 0 => CronSchedule::every(secs * 1000),
                (_, Some(expr)) => CronSchedule::cron(expr, tz),
                _ => anyhow::bail!("one of --every or --cron is required"),
            };

            let deliver = channel.is_some() && to.is_some();
            let mut job = CronJob::new(
                name.unwrap_or_else(|| rustle_core::utils::truncate(&message, 30)),
                schedule,
                CronPayload {
                    message,
                    deliver,
                    channel,
                    to,
                },
            );
            job.delete_after_run = once;

            let id = service.add_job(job).await?;
            println!("{} {id}", "added job".green());
        }

        CronCommands::List => {
            let jobs = service.list_jobs().await;
            if jobs.is_empty() {
                println!("no scheduled jobs");
                return Ok(());
            }
            for job in jobs {
                let when = match job.schedule.kind {
                    ScheduleKind::At => format!("at {}", job.schedule.at_ms.unwrap_or_default()),
                    ScheduleKind::Every => format!(
                        "every {}s",
                        job.schedule.every_ms.unwrap_or_default() / 1000
                    ),
                    ScheduleKind::Cron => format!(
                        "cron '{}'{}",
                        job.schedule.expr.as_deref().unwrap_or(""),
                        job.schedule
                            .tz
                            .as_deref()
                            .map(|tz| format!(" ({tz})"))
                            .unwrap_or_default()
                    ),
                };
                let status = job
                    .state
                    .last_status
                    .as_ref()
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_else(|| "never ran".to_string());
                println!(
                    "  {} {} — {} [{}]{}",
                    job.id.bold(),
                    job.name,
                    when,
                    status,
                    if job.enabled { "" } else { " (disabled)" }
                );
            }
        }

        CronCommands::Remove { id } => {
            if service.remove_job(&id).await? {
                println!("{} {id}", "removed job".green());
            } else {
                println!("{} {id}", "no such job".red());
            }
        }
    }

    Ok(())
}
