//! Reminder executor: drains due jobs and decides, per job, whether the
//! reminder still makes sense before handing it to the notification sender.
//!
//! Every claimed job ends in exactly one [`JobOutcome`]. Terminal outcomes
//! are acknowledged with [`JobQueue::complete`] or [`JobQueue::discard`];
//! transient failures go back to the queue with exponential backoff.

use std::{sync::Arc, time::Duration as StdDuration};

use bellhop_core::{
    config::WorkerConfig, Appointment, AppointmentStatus, BellhopError, Clock, ReminderDirective,
    ReminderKind, ReminderPayload,
};
use bellhop_queue::{ClaimedJob, JobQueue};
use chrono::{DateTime, Duration, Utc};
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SendError},
    sender::NotificationSender,
    store::AppointmentStore,
};

/// Shortest idle sleep, so a just-missed claim does not spin the worker.
const MIN_IDLE_WAIT: StdDuration = StdDuration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub send_timeout: StdDuration,
    pub poll_interval: StdDuration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            backoff_base: Duration::seconds(30),
            backoff_max: Duration::minutes(15),
            send_timeout: StdDuration::from_secs(10),
            poll_interval: StdDuration::from_secs(1),
        }
    }
}

impl TryFrom<&WorkerConfig> for ExecutorConfig {
    type Error = BellhopError;

    fn try_from(cfg: &WorkerConfig) -> std::result::Result<Self, BellhopError> {
        cfg.validate()?;
        Ok(Self {
            concurrency: cfg.concurrency.max(1),
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: cfg.backoff_base()?,
            backoff_max: cfg.backoff_max()?,
            send_timeout: StdDuration::from_secs(cfg.send_timeout_secs),
            poll_interval: StdDuration::from_millis(cfg.poll_interval_ms),
        })
    }
}

impl ExecutorConfig {
    /// Retry delay after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `backoff_max`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2i32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

/// Why a job was dropped as no longer relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Cancelled, completed or no-show.
    Closed(AppointmentStatus),
    /// The appointment moved after this job was scheduled.
    Rescheduled {
        snapshot: DateTime<Utc>,
        current: DateTime<Utc>,
    },
    /// The session already started (or, for the at-time reminder, ended).
    TooLate,
}

/// Why a job can never be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    AppointmentNotFound,
    MissingContact,
    /// The stored payload could not be decoded.
    BadPayload(String),
}

/// Result of processing one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent,
    SkippedStale(StaleReason),
    SkippedInvalid(InvalidReason),
    /// Transient failure; the job is back on the queue after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Attempts exhausted or permanent failure. Needs operator attention.
    Discarded { attempt: u32, error: String },
}

impl JobOutcome {
    /// Value stored in the queue's `outcome` column.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Sent => "sent",
            JobOutcome::SkippedStale(_) => "skipped_stale",
            JobOutcome::SkippedInvalid(_) => "skipped_invalid",
            JobOutcome::RetryScheduled { .. } => "retry_scheduled",
            JobOutcome::Discarded { .. } => "discarded",
        }
    }
}

/// Decide whether a reminder for `appointment` is still worth sending at
/// `now`. Returns the contact address to send to, or the skip outcome.
pub fn check_appointment<'a>(
    appointment: &'a Appointment,
    kind: ReminderKind,
    snapshot_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> std::result::Result<&'a str, JobOutcome> {
    if appointment.status.is_closed() {
        return Err(JobOutcome::SkippedStale(StaleReason::Closed(appointment.status)));
    }
    if appointment.start_time != snapshot_start {
        return Err(JobOutcome::SkippedStale(StaleReason::Rescheduled {
            snapshot: snapshot_start,
            current: appointment.start_time,
        }));
    }
    let too_late = match kind {
        ReminderKind::AtTime => appointment.end_time <= now,
        ReminderKind::H24 | ReminderKind::H1 => appointment.start_time <= now,
    };
    if too_late {
        return Err(JobOutcome::SkippedStale(StaleReason::TooLate));
    }
    appointment
        .contact()
        .ok_or(JobOutcome::SkippedInvalid(InvalidReason::MissingContact))
}

/// Pulls due reminder jobs and delivers them. Cheap to clone; every worker
/// in [`run`](Self::run) holds its own copy.
#[derive(Clone)]
pub struct Executor {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn AppointmentStore>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn AppointmentStore>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            store,
            sender,
            clock,
            config,
        }
    }

    /// Claim and process one due job. `Ok(None)` when nothing is due.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        let Some(claim) = self.queue.dequeue_due()? else {
            return Ok(None);
        };
        debug!(job_key = %claim.job_key, attempt = claim.attempt, "job claimed");
        self.process(&claim).await.map(Some)
    }

    /// Process due jobs until none is left. Jobs requeued with a backoff
    /// delay are not due yet and end the drain.
    pub async fn drain_due(&self) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn process(&self, claim: &ClaimedJob) -> Result<JobOutcome> {
        if claim.attempt > self.config.max_attempts {
            let error = format!(
                "redelivered after {} attempts without acknowledgement",
                claim.attempt - 1
            );
            return self.discard(claim, error);
        }

        let payload: ReminderPayload = match serde_json::from_str(&claim.payload) {
            Ok(p) => p,
            Err(e) => {
                let outcome = JobOutcome::SkippedInvalid(InvalidReason::BadPayload(e.to_string()));
                return self.finish(claim, outcome);
            }
        };

        let appointment = match self.store.get(&claim.appointment_id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                return self.finish(
                    claim,
                    JobOutcome::SkippedInvalid(InvalidReason::AppointmentNotFound),
                )
            }
            Err(e) => return self.retry_or_discard(claim, format!("appointment store: {e}")),
        };

        let now = self.clock.now();
        let contact =
            match check_appointment(&appointment, claim.kind, payload.snapshot_start_time, now) {
                Ok(contact) => contact,
                Err(outcome) => return self.finish(claim, outcome),
            };

        let directive =
            ReminderDirective::new(claim.job_key.clone(), claim.kind, &appointment, contact);
        let sent = tokio::time::timeout(self.config.send_timeout, self.sender.send(&directive)).await;

        match sent {
            Ok(Ok(())) => {
                let outcome = self.finish(claim, JobOutcome::Sent)?;
                if let Err(e) = self
                    .store
                    .record_reminder_sent(&appointment.id, claim.kind, self.clock.now())
                    .await
                {
                    warn!(job_key = %claim.job_key, error = %e, "failed to record reminder bookkeeping");
                }
                Ok(outcome)
            }
            Ok(Err(SendError::Transient(msg))) => self.retry_or_discard(claim, msg),
            Ok(Err(SendError::Permanent(msg))) => self.discard(claim, msg),
            Err(_) => self.retry_or_discard(
                claim,
                format!("send timed out after {}ms", self.config.send_timeout.as_millis()),
            ),
        }
    }

    /// Acknowledge a terminal, non-failure outcome.
    fn finish(&self, claim: &ClaimedJob, outcome: JobOutcome) -> Result<JobOutcome> {
        self.queue.complete(claim, outcome.label())?;
        match &outcome {
            JobOutcome::Sent => {
                info!(job_key = %claim.job_key, appointment_id = %claim.appointment_id,
                      kind = %claim.kind, attempt = claim.attempt, "reminder sent")
            }
            other => {
                info!(job_key = %claim.job_key, appointment_id = %claim.appointment_id,
                      kind = %claim.kind, outcome = ?other, "reminder skipped")
            }
        }
        Ok(outcome)
    }

    fn retry_or_discard(&self, claim: &ClaimedJob, error: String) -> Result<JobOutcome> {
        if claim.attempt >= self.config.max_attempts {
            return self.discard(claim, error);
        }
        let delay = self.config.backoff_delay(claim.attempt);
        self.queue.requeue(claim, delay, &error)?;
        warn!(
            job_key = %claim.job_key,
            attempt = claim.attempt,
            max_attempts = self.config.max_attempts,
            retry_in_secs = delay.num_seconds(),
            %error,
            "reminder delivery failed, retrying"
        );
        Ok(JobOutcome::RetryScheduled {
            attempt: claim.attempt,
            delay,
        })
    }

    fn discard(&self, claim: &ClaimedJob, error: String) -> Result<JobOutcome> {
        self.queue.discard(claim, &error)?;
        error!(
            job_key = %claim.job_key,
            appointment_id = %claim.appointment_id,
            kind = %claim.kind,
            attempt = claim.attempt,
            %error,
            "reminder delivery failed permanently"
        );
        Ok(JobOutcome::Discarded {
            attempt: claim.attempt,
            error,
        })
    }

    /// Run `concurrency` workers until `shutdown` turns `true` or its
    /// sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(workers = self.config.concurrency, "reminder executor started");
        let mut workers = JoinSet::new();
        for worker in 0..self.config.concurrency {
            let executor = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { executor.worker_loop(worker, shutdown).await });
        }
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!("reminder worker panicked: {e}");
            }
        }
        info!("reminder executor stopped");
    }

    async fn worker_loop(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker, "reminder worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker, error = %e, "reminder worker: queue error"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.idle_wait()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(worker, "reminder worker stopped");
    }

    /// Sleep until the next job is due, but never longer than the poll interval.
    fn idle_wait(&self) -> StdDuration {
        match self.queue.next_fire_at() {
            Ok(Some(next)) => (next - self.clock.now())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .clamp(MIN_IDLE_WAIT, self.config.poll_interval.max(MIN_IDLE_WAIT)),
            _ => self.config.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellhop_core::{AppointmentId, ManualClock};
    use bellhop_queue::{JobState, NewJob, SqliteJobQueue};
    use chrono::TimeZone;
    use rusqlite::Connection;

    use crate::{sender::LogSender, store::InMemoryAppointmentStore};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap()
    }

    fn appointment() -> Appointment {
        Appointment {
            id: AppointmentId::from("a1"),
            start_time: start(),
            end_time: start() + Duration::minutes(50),
            status: AppointmentStatus::Scheduled,
            recipient_contact: Some("kim@example.com".into()),
            counterparty_name: None,
            notes: None,
            join_reference: None,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = ExecutorConfig {
            backoff_base: Duration::seconds(30),
            backoff_max: Duration::seconds(100),
            ..ExecutorConfig::default()
        };
        assert_eq!(cfg.backoff_delay(1), Duration::seconds(30));
        assert_eq!(cfg.backoff_delay(2), Duration::seconds(60));
        assert_eq!(cfg.backoff_delay(3), Duration::seconds(100));
        assert_eq!(cfg.backoff_delay(40), Duration::seconds(100));
    }

    #[test]
    fn worker_config_is_checked_before_use() {
        let cfg = ExecutorConfig::try_from(&WorkerConfig::default()).unwrap();
        assert_eq!(cfg.backoff_base, Duration::seconds(30));
        assert_eq!(cfg.backoff_max, Duration::seconds(900));
        assert_eq!(cfg.send_timeout, StdDuration::from_secs(10));

        // A send allowed to outlive its lease would be redelivered mid-flight.
        let slow = WorkerConfig {
            send_timeout_secs: 600,
            ..WorkerConfig::default()
        };
        assert!(matches!(
            ExecutorConfig::try_from(&slow),
            Err(BellhopError::Config(_))
        ));

        let huge = WorkerConfig {
            backoff_base_secs: u64::MAX,
            ..WorkerConfig::default()
        };
        assert!(matches!(
            ExecutorConfig::try_from(&huge),
            Err(BellhopError::Config(_))
        ));
    }

    #[test]
    fn closed_statuses_are_stale() {
        let before = start() - Duration::hours(1);
        for status in [
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
        ] {
            let appt = Appointment {
                status,
                ..appointment()
            };
            assert_eq!(
                check_appointment(&appt, ReminderKind::H1, start(), before),
                Err(JobOutcome::SkippedStale(StaleReason::Closed(status)))
            );
        }
    }

    #[test]
    fn moved_start_is_stale() {
        let appt = appointment();
        let old = start() - Duration::days(1);
        assert!(matches!(
            check_appointment(&appt, ReminderKind::H24, old, old - Duration::hours(24)),
            Err(JobOutcome::SkippedStale(StaleReason::Rescheduled { .. }))
        ));
    }

    #[test]
    fn at_time_tolerates_running_session() {
        let appt = Appointment {
            status: AppointmentStatus::InProgress,
            ..appointment()
        };
        let during = start() + Duration::minutes(10);
        assert_eq!(
            check_appointment(&appt, ReminderKind::AtTime, start(), during),
            Ok("kim@example.com")
        );
        assert_eq!(
            check_appointment(&appt, ReminderKind::H1, start(), during),
            Err(JobOutcome::SkippedStale(StaleReason::TooLate))
        );
        assert_eq!(
            check_appointment(&appt, ReminderKind::AtTime, start(), appt.end_time),
            Err(JobOutcome::SkippedStale(StaleReason::TooLate))
        );
    }

    #[test]
    fn missing_contact_is_invalid() {
        let appt = Appointment {
            recipient_contact: None,
            ..appointment()
        };
        assert_eq!(
            check_appointment(&appt, ReminderKind::H1, start(), start() - Duration::hours(1)),
            Err(JobOutcome::SkippedInvalid(InvalidReason::MissingContact))
        );
    }

    #[tokio::test]
    async fn over_attempted_redelivery_is_discarded_unsent() {
        let clock = Arc::new(ManualClock::new(start() - Duration::hours(2)));
        let queue = Arc::new(
            SqliteJobQueue::new(
                Connection::open_in_memory().unwrap(),
                clock.clone(),
                Duration::minutes(5),
            )
            .unwrap(),
        );
        let store = Arc::new(InMemoryAppointmentStore::new());
        store.insert(appointment());
        let executor = Executor::new(
            queue.clone(),
            store.clone(),
            Arc::new(LogSender),
            clock.clone(),
            ExecutorConfig {
                max_attempts: 2,
                ..ExecutorConfig::default()
            },
        );

        let appt = appointment();
        let key = bellhop_core::JobKey::derive(&appt.id, ReminderKind::H1);
        queue
            .enqueue_delayed(
                NewJob {
                    job_key: key.clone(),
                    appointment_id: appt.id.clone(),
                    kind: ReminderKind::H1,
                    payload: serde_json::to_string(&ReminderPayload::snapshot(
                        &appt,
                        ReminderKind::H1,
                    ))
                    .unwrap(),
                },
                Duration::zero(),
            )
            .unwrap();

        // Two workers crash holding the job; the third claim is over budget.
        queue.dequeue_due().unwrap().unwrap();
        clock.advance(Duration::minutes(5));
        queue.dequeue_due().unwrap().unwrap();
        clock.advance(Duration::minutes(5));

        let outcome = executor.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Discarded { attempt: 3, .. }));
        assert_eq!(queue.get(&key).unwrap().unwrap().state, JobState::Discarded);
        assert!(store.reminders_sent().is_empty());
    }

    #[tokio::test]
    async fn corrupt_payload_is_invalid() {
        let clock = Arc::new(ManualClock::new(start() - Duration::hours(2)));
        let queue = Arc::new(
            SqliteJobQueue::new(
                Connection::open_in_memory().unwrap(),
                clock.clone(),
                Duration::minutes(5),
            )
            .unwrap(),
        );
        let executor = Executor::new(
            queue.clone(),
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(LogSender),
            clock,
            ExecutorConfig::default(),
        );
        let appointment_id = AppointmentId::from("a1");
        queue
            .enqueue_delayed(
                NewJob {
                    job_key: bellhop_core::JobKey::derive(&appointment_id, ReminderKind::H24),
                    appointment_id,
                    kind: ReminderKind::H24,
                    payload: "not json".into(),
                },
                Duration::zero(),
            )
            .unwrap();

        let outcomes = executor.drain_due().await.unwrap();
        assert!(matches!(
            outcomes.as_slice(),
            [JobOutcome::SkippedInvalid(InvalidReason::BadPayload(_))]
        ));
        assert_eq!(queue.stats(0).unwrap().outcomes.get("skipped_invalid"), Some(&1));
    }
}
