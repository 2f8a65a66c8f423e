//! The cron scheduler.
//!
//! Jobs live in `~/.rustle/cron/jobs.json`, guarded by a single mutex — all
//! mutations (tool, CLI, timer) are serialized through it. The timer sleeps
//! until the nearest `nextRunAtMs`, capped at one second so due jobs are
//! evaluated at least once per second.
//!
//! Firing a job does not call into the agent: it publishes a synthetic
//! `InboundMessage` on the bus, targeted at the payload's channel/recipient
//! (or the CLI channel when none), and the agent loop handles it like any
//! other message. The reply then reaches the channel through the normal
//! outbound path.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::InboundMessage;

use crate::types::{compute_next_run_from, CronJob, CronStore, JobStatus, ScheduleKind};

/// Sender id on synthesized inbound messages.
const CRON_SENDER: &str = "cron";

/// Fallback channel when a job has no delivery target.
const DEFAULT_CHANNEL: &str = "cli";

/// Max sleep between due-job evaluations.
const MAX_TICK_MS: i64 = 1_000;

// ─────────────────────────────────────────────
// CronService
// ─────────────────────────────────────────────

pub struct CronService {
    store_path: PathBuf,
    store: Mutex<CronStore>,
    bus: Arc<MessageBus>,
    shutdown: Notify,
    /// Poked when jobs change so the timer re-arms immediately.
    rearm: Notify,
}

impl CronService {
    /// `store_path` defaults to `~/.rustle/cron/jobs.json`.
    pub fn new(bus: Arc<MessageBus>, store_path: Option<PathBuf>) -> Self {
        let path = store_path
            .unwrap_or_else(|| rustle_core::utils::data_dir().join("cron").join("jobs.json"));
        Self {
            store_path: path,
            store: Mutex::new(CronStore::new()),
            bus,
            shutdown: Notify::new(),
            rearm: Notify::new(),
        }
    }

    // ─────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────

    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.store_path.exists() {
            debug!(path = %self.store_path.display(), "no cron store yet, starting empty");
            return Ok(());
        }
        let data = tokio::fs::read_to_string(&self.store_path).await?;
        let loaded: CronStore = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse cron store: {e}"))?;
        let mut store = self.store.lock().await;
        info!(jobs = loaded.jobs.len(), "loaded cron store");
        *store = loaded;
        Ok(())
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = {
            let store = self.store.lock().await;
            serde_json::to_string_pretty(&*store)?
        };
        tokio::fs::write(&self.store_path, json).await?;
        Ok(())
    }

    // ─────────────────────────────────────────
    // Job management
    // ─────────────────────────────────────────

    /// Add a job: computes its first fire time, persists, re-arms the timer.
    pub async fn add_job(&self, mut job: CronJob) -> anyhow::Result<String> {
        let now_ms = Utc::now().timestamp_millis();
        job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now_ms);
        if job.state.next_run_at_ms.is_none() && job.schedule.kind == ScheduleKind::Cron {
            anyhow::bail!(
                "invalid cron expression: {}",
                job.schedule.expr.as_deref().unwrap_or("")
            );
        }

        let id = job.id.clone();
        {
            let mut store = self.store.lock().await;
            store.add(job);
        }
        self.save().await?;
        self.rearm.notify_one();
        info!(id = %id, "cron job added");
        Ok(id)
    }

    pub async fn remove_job(&self, id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut store = self.store.lock().await;
            store.remove(id)
        };
        if removed {
            self.save().await?;
            self.rearm.notify_one();
            info!(id = %id, "cron job removed");
        }
        Ok(removed)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> anyhow::Result<bool> {
        let found = {
            let mut store = self.store.lock().await;
            match store.find_mut(id) {
                Some(job) => {
                    job.enabled = enabled;
                    job.updated_at_ms = Utc::now().timestamp_millis();
                    if enabled {
                        job.state.next_run_at_ms = job.compute_next_run();
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.save().await?;
            self.rearm.notify_one();
        }
        Ok(found)
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.store.lock().await.jobs.clone()
    }

    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        self.store.lock().await.find(id).cloned()
    }

    // ─────────────────────────────────────────
    // Timer
    // ─────────────────────────────────────────

    /// Run the scheduler until `stop()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        if let Err(e) = self.load().await {
            warn!(error = %e, "cron store unreadable, starting empty");
        }
        self.reconcile_after_load().await;

        info!("cron service started");

        loop {
            let sleep_ms = {
                let store = self.store.lock().await;
                let now = Utc::now().timestamp_millis();
                match store.next_wake_ms() {
                    Some(next) => (next - now).clamp(0, MAX_TICK_MS),
                    None => MAX_TICK_MS,
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(sleep_ms as u64)) => {
                    self.fire_due_jobs().await;
                }
                _ = self.rearm.notified() => {
                    debug!("cron timer re-armed");
                }
                _ = self.shutdown.notified() => {
                    info!("cron service shutting down");
                    return Ok(());
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Post-restart policy: recurring jobs whose whole window was missed
    /// skip forward (no replay); an overdue one-shot stays due and fires
    /// once on catch-up.
    async fn reconcile_after_load(&self) {
        let now = Utc::now().timestamp_millis();
        let mut dirty = false;
        {
            let mut store = self.store.lock().await;
            for job in store.jobs.iter_mut().filter(|j| j.enabled) {
                match job.state.next_run_at_ms {
                    None => {
                        job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now);
                        dirty = true;
                    }
                    Some(next) if next < now && job.schedule.kind != ScheduleKind::At => {
                        job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now);
                        job.state.last_status = Some(JobStatus::Skipped);
                        dirty = true;
                        debug!(id = %job.id, "missed window skipped on reload");
                    }
                    _ => {}
                }
            }
        }
        if dirty {
            if let Err(e) = self.save().await {
                warn!(error = %e, "failed to persist reconciled cron store");
            }
        }
    }

    async fn fire_due_jobs(&self) {
        let now = Utc::now().timestamp_millis();
        let due = {
            let store = self.store.lock().await;
            store.due_job_ids(now)
        };
        for id in due {
            self.fire_job(&id).await;
        }
    }

    /// Fire one job: synthesize the inbound, update state, recompute or
    /// remove per the schedule kind.
    pub async fn fire_job(&self, id: &str) {
        let job = {
            let store = self.store.lock().await;
            store.find(id).cloned()
        };
        let Some(job) = job else {
            warn!(id = id, "due cron job vanished before firing");
            return;
        };

        info!(id = %job.id, name = %job.name, "cron job firing");

        let (channel, chat_id) = if job.payload.deliver {
            (
                job.payload
                    .channel
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
                job.payload
                    .to
                    .clone()
                    .unwrap_or_else(|| format!("cron-{}", job.id)),
            )
        } else {
            (DEFAULT_CHANNEL.to_string(), format!("cron-{}", job.id))
        };

        let inbound = InboundMessage::new(channel, CRON_SENDER, chat_id, &job.payload.message);
        let publish_result = self.bus.publish_inbound(inbound).await;

        let now_ms = Utc::now().timestamp_millis();
        let mut remove_after = false;
        {
            let mut store = self.store.lock().await;
            if let Some(j) = store.find_mut(id) {
                j.state.last_run_at_ms = Some(now_ms);
                match &publish_result {
                    Ok(()) => {
                        j.state.last_status = Some(JobStatus::Ok);
                        j.state.last_error = None;
                    }
                    Err(e) => {
                        j.state.last_status = Some(JobStatus::Error);
                        j.state.last_error = Some(e.to_string());
                        error!(id = %id, error = %e, "failed to inject cron message");
                    }
                }

                // One-shots and delete-after-run jobs leave the store; the
                // rest march forward.
                if j.schedule.kind == ScheduleKind::At || j.delete_after_run {
                    remove_after = true;
                } else {
                    j.state.next_run_at_ms = compute_next_run_from(&j.schedule, now_ms);
                }
                j.updated_at_ms = now_ms;
            }
            if remove_after {
                store.remove(id);
            }
        }

        if let Err(e) = self.save().await {
            error!(error = %e, "failed to persist cron store after fire");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
