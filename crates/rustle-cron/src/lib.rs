//! Time-triggered work: the cron scheduler and the heartbeat.
//!
//! Both services synthesize `InboundMessage`s on the bus when they fire, so
//! scheduled work flows through the same serialization point as user input.

pub mod heartbeat;
pub mod service;
pub mod types;

pub use heartbeat::HeartbeatService;
pub use service::CronService;
pub use types::{CronJob, CronPayload, CronSchedule, CronStore, JobStatus, ScheduleKind};
