//! The `cron` tool — scheduling reminders and recurring tasks from chat.
//!
//! `add` needs the session context (set per turn by the agent loop) so the
//! job's output routes back to the conversation that created it. A job added
//! outside any conversation is an error, not a silent default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use rustle_cron::{CronJob, CronPayload, CronSchedule, CronService};

use super::base::{optional_i64, optional_string, require_string, Tool};

pub struct CronTool {
    cron: Arc<CronService>,
    /// (channel, chat_id) of the current turn; empty until set.
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self {
            cron,
            context: Mutex::new((String::new(), String::new())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }

    async fn add(
        &self,
        message: String,
        every_seconds: Option<i64>,
        cron_expr: Option<String>,
    ) -> anyhow::Result<String> {
        if message.is_empty() {
            return Ok("Error: message is required for add".into());
        }
        let (channel, chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };
        if channel.is_empty() || chat_id.is_empty() {
            return Ok("Error: no session context (channel/chat_id)".into());
        }

        let schedule = match (every_seconds, cron_expr) {
            (Some(secs), _) if secs > 0 => CronSchedule::every(secs * 1000),
            (_, Some(expr)) if !expr.is_empty() => CronSchedule::cron(expr, None),
            _ => return Ok("Error: either every_seconds or cron_expr is required".into()),
        };

        let name = rustle_core::utils::truncate(&message, 30);
        let job = CronJob::new(
            name.clone(),
            schedule,
            CronPayload {
                message,
                deliver: true,
                channel: Some(channel),
                to: Some(chat_id),
            },
        );

        match self.cron.add_job(job).await {
            Ok(id) => Ok(format!("Created job '{name}' (id: {id})")),
            Err(e) => Ok(format!("Error: {e}")),
        }
    }

    async fn list(&self) -> String {
        let jobs = self.cron.list_jobs().await;
        if jobs.is_empty() {
            return "No scheduled jobs.".into();
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|j| format!("- {} (id: {}, {:?})", j.name, j.id, j.schedule.kind))
            .collect();
        format!("Scheduled jobs:\n{}", lines.join("\n"))
    }

    async fn remove(&self, job_id: Option<String>) -> String {
        let Some(id) = job_id.filter(|id| !id.is_empty()) else {
            return "Error: job_id is required for remove".into();
        };
        match self.cron.remove_job(&id).await {
            Ok(true) => format!("Removed job {id}"),
            Ok(false) => format!("Job {id} not found"),
            Err(e) => format!("Error: {e}"),
        }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule reminders and recurring tasks. Actions: add, list, remove."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove"],
                    "description": "Action to perform"
                },
                "message": {
                    "type": "string",
                    "description": "Reminder message (for add)"
                },
                "every_seconds": {
                    "type": "integer",
                    "description": "Interval in seconds (for recurring tasks)"
                },
                "cron_expr": {
                    "type": "string",
                    "description": "Cron expression like '0 9 * * *' (for scheduled tasks)"
                },
                "job_id": {
                    "type": "string",
                    "description": "Job id (for remove)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;
        match action.as_str() {
            "add" => {
                self.add(
                    optional_string(&params, "message").unwrap_or_default(),
                    optional_i64(&params, "every_seconds"),
                    optional_string(&params, "cron_expr"),
                )
                .await
            }
            "list" => Ok(self.list().await),
            "remove" => Ok(self.remove(optional_string(&params, "job_id")).await),
            other => Ok(format!("Unknown action: {other}")),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
