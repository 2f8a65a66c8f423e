//! Cron data model: schedules, payloads, job state, and the JSON store.
//!
//! Serialized with camelCase keys to match the rest of the on-disk formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Schedule
// ─────────────────────────────────────────────

/// How a job decides when to fire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// One-shot at a fixed timestamp.
    At,
    /// Every N milliseconds.
    Every,
    /// Cron expression, optionally in a named time zone.
    Cron,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    pub kind: ScheduleKind,
    /// One-shot time (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_ms: Option<i64>,
    /// Interval (ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<i64>,
    /// Standard 5-field cron expression, e.g. `"0 9 * * *"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// IANA time zone name for `expr`, e.g. `"Europe/Madrid"`. UTC if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

impl CronSchedule {
    pub fn at(at_ms: i64) -> Self {
        Self {
            kind: ScheduleKind::At,
            at_ms: Some(at_ms),
            every_ms: None,
            expr: None,
            tz: None,
        }
    }

    pub fn every(every_ms: i64) -> Self {
        Self {
            kind: ScheduleKind::Every,
            at_ms: None,
            every_ms: Some(every_ms),
            expr: None,
            tz: None,
        }
    }

    pub fn cron(expr: impl Into<String>, tz: Option<String>) -> Self {
        Self {
            kind: ScheduleKind::Cron,
            at_ms: None,
            every_ms: None,
            expr: Some(expr.into()),
            tz,
        }
    }
}

/// The `cron` crate wants a seconds field; users write the standard 5-field
/// form. Prepend `0` seconds when only 5 fields are given.
fn normalize_cron_expr(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Next fire time for a schedule, computed from `now_ms`.
///
/// Returns `None` for unparseable cron expressions (the job simply never
/// becomes due; the add path rejects them up front).
pub fn compute_next_run_from(schedule: &CronSchedule, now_ms: i64) -> Option<i64> {
    match schedule.kind {
        ScheduleKind::At => schedule.at_ms,
        ScheduleKind::Every => {
            let interval = schedule.every_ms.unwrap_or(60_000);
            Some(now_ms + interval)
        }
        ScheduleKind::Cron => {
            let expr = schedule.expr.as_deref()?;
            let parsed: cron::Schedule = normalize_cron_expr(expr).parse().ok()?;
            let now: DateTime<Utc> = DateTime::from_timestamp_millis(now_ms)?;

            match schedule.tz.as_deref().and_then(|name| name.parse::<chrono_tz::Tz>().ok()) {
                Some(tz) => {
                    let local = now.with_timezone(&tz);
                    parsed.after(&local).next().map(|dt| dt.timestamp_millis())
                }
                None => parsed.after(&now).next().map(|dt| dt.timestamp_millis()),
            }
        }
    }
}

// ─────────────────────────────────────────────
// Payload & state
// ─────────────────────────────────────────────

/// What firing a job injects into the runtime.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPayload {
    /// Prompt text for the agent.
    #[serde(default)]
    pub message: String,
    /// Target the agent's reply at a channel (otherwise the CLI channel).
    #[serde(default)]
    pub deliver: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Outcome of the last fire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────
// Job & store
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Short unique id (8 hex chars).
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    /// Remove the job after a single fire.
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_true() -> bool {
    true
}

impl CronJob {
    pub fn new(name: impl Into<String>, schedule: CronSchedule, payload: CronPayload) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            name: name.into(),
            enabled: true,
            schedule,
            payload,
            state: CronJobState::default(),
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run: false,
        }
    }

    /// Due when enabled and `next_run_at_ms` has passed.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled
            && self
                .state
                .next_run_at_ms
                .is_some_and(|next| now_ms >= next)
    }

    pub fn compute_next_run(&self) -> Option<i64> {
        compute_next_run_from(&self.schedule, Utc::now().timestamp_millis())
    }
}

/// The persisted job list (`cron/jobs.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStore {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

fn default_version() -> u32 {
    1
}

impl Default for CronStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CronStore {
    pub fn new() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&CronJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut CronJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn add(&mut self, job: CronJob) {
        self.jobs.push(job);
    }

    /// Returns whether the job existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        self.jobs.len() < before
    }

    pub fn due_job_ids(&self, now_ms: i64) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|j| j.is_due(now_ms))
            .map(|j| j.id.clone())
            .collect()
    }

    /// Nearest scheduled fire time across enabled jobs.
    pub fn next_wake_ms(&self) -> Option<i64> {
        self.jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
