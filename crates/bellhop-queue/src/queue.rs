use bellhop_core::{AppointmentId, JobKey};
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::types::{ClaimedJob, DeleteOutcome, JobRecord, JobRef, NewJob, QueueStats};

/// The job queue backend contract.
///
/// Every mutation is keyed by [`JobKey`]; implementations must give
/// "last write to a key wins" semantics, which is the only ordering the
/// reminder components rely on.
pub trait JobQueue: Send + Sync {
    /// Insert or replace the job under `job.job_key`, due `delay` from now.
    fn enqueue_delayed(&self, job: NewJob, delay: Duration) -> Result<JobRef>;

    /// Remove a not-yet-claimed job.
    fn delete(&self, job_key: &JobKey) -> Result<DeleteOutcome>;

    /// Claim the earliest due job, if any, under a fresh lease.
    fn dequeue_due(&self) -> Result<Option<ClaimedJob>>;

    /// Put a claimed job back, due `delay` from now. Returns `false` when the
    /// lease was lost (the job was replaced, deleted or reclaimed).
    fn requeue(&self, claim: &ClaimedJob, delay: Duration, error: &str) -> Result<bool>;

    /// Mark a claimed job as fired with the given outcome label.
    fn complete(&self, claim: &ClaimedJob, outcome: &str) -> Result<bool>;

    /// Mark a claimed job as discarded.
    fn discard(&self, claim: &ClaimedJob, error: &str) -> Result<bool>;

    /// Look up a single job by key.
    fn get(&self, job_key: &JobKey) -> Result<Option<JobRecord>>;

    /// All jobs (any state) of one appointment, ordered by fire time.
    fn jobs_for(&self, appointment_id: &AppointmentId) -> Result<Vec<JobRecord>>;

    /// Counters and the next `next_n` pending jobs. Never mutates.
    fn stats(&self, next_n: usize) -> Result<QueueStats>;

    /// Earliest instant at which a job becomes claimable.
    fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Delete fired/discarded jobs last updated before `older_than`.
    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize>;
}
