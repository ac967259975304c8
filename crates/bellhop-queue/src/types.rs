use std::collections::BTreeMap;

use bellhop_core::{AppointmentId, JobKey, ReminderKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its fire time.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Consumed; see the job's outcome.
    Fired,
    /// Given up on.
    Discarded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Fired => "fired",
            JobState::Discarded => "discarded",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "fired" => Ok(JobState::Fired),
            "discarded" => Ok(JobState::Discarded),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// A job to enqueue. `payload` is opaque JSON owned by the caller.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_key: JobKey,
    pub appointment_id: AppointmentId,
    pub kind: ReminderKind,
    pub payload: String,
}

/// Receipt for an enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRef {
    pub job_key: JobKey,
    pub fire_at: DateTime<Utc>,
    /// A live (pending or running) job with the same key was overwritten.
    pub replaced: bool,
}

/// Result of a keyed delete. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteOutcome {
    Removed,
    NotFound,
    AlreadyRunning,
}

/// A job claimed by a worker. Acknowledgements must present the lease id.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_key: JobKey,
    pub appointment_id: AppointmentId,
    pub kind: ReminderKind,
    pub payload: String,
    /// 1-based number of this delivery attempt.
    pub attempt: u32,
    pub fire_at: DateTime<Utc>,
    pub lease_id: String,
}

/// Read-only view of a stored job, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_key: JobKey,
    pub appointment_id: AppointmentId,
    pub kind: ReminderKind,
    pub state: JobState,
    pub fire_at: DateTime<Utc>,
    pub attempt: u32,
    pub outcome: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Queue-wide counters plus the next jobs due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub fired: u64,
    pub discarded: u64,
    /// Finished jobs grouped by recorded outcome (`sent`, `skipped_stale`, …).
    pub outcomes: BTreeMap<String, u64>,
    pub next_pending: Vec<JobRecord>,
}
