use std::sync::Arc;

use bellhop_core::{
    Appointment, AppointmentId, AppointmentStatus, Clock, JobKey, ReminderKind, ReminderPayload,
};
use bellhop_queue::{JobQueue, NewJob};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{ReminderError, Result};

/// One reminder that was put on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledReminder {
    pub kind: ReminderKind,
    pub job_key: JobKey,
    pub fire_at: DateTime<Utc>,
    /// An earlier job under the same key was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleResult {
    pub appointment_id: AppointmentId,
    /// In fire order.
    pub scheduled: Vec<ScheduledReminder>,
    /// Kinds whose fire time had already passed.
    pub skipped: Vec<ReminderKind>,
}

impl ScheduleResult {
    pub fn kinds(&self) -> Vec<ReminderKind> {
        self.scheduled.iter().map(|r| r.kind).collect()
    }
}

/// Enqueues the reminder jobs of an appointment.
///
/// Job keys are derived from `(appointment, kind)`, so scheduling the same
/// appointment again replaces its jobs rather than adding new ones.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }

    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub fn schedule(&self, appointment: &Appointment) -> Result<ScheduleResult> {
        let now = self.clock.now();
        validate(appointment, now)?;

        let mut result = ScheduleResult {
            appointment_id: appointment.id.clone(),
            scheduled: Vec::new(),
            skipped: Vec::new(),
        };

        for kind in ReminderKind::ALL {
            let fire_at = kind.fire_at(appointment.start_time);
            if fire_at <= now {
                debug!(%kind, %fire_at, "fire time already passed, skipping");
                result.skipped.push(kind);
                continue;
            }

            let payload = ReminderPayload::snapshot(appointment, kind);
            let job = NewJob {
                job_key: JobKey::derive(&appointment.id, kind),
                appointment_id: appointment.id.clone(),
                kind,
                payload: serde_json::to_string(&payload)?,
            };
            let job_ref = self.queue.enqueue_delayed(job, fire_at - now)?;
            result.scheduled.push(ScheduledReminder {
                kind,
                job_key: job_ref.job_key,
                fire_at: job_ref.fire_at,
                replaced: job_ref.replaced,
            });
        }

        info!(
            scheduled = result.scheduled.len(),
            skipped = result.skipped.len(),
            start_time = %appointment.start_time,
            "reminders scheduled"
        );
        Ok(result)
    }
}

fn validate(appointment: &Appointment, now: DateTime<Utc>) -> Result<()> {
    if appointment.id.as_str().trim().is_empty() {
        return Err(ReminderError::InvalidInput("appointment id is empty".into()));
    }
    if appointment.status != AppointmentStatus::Scheduled {
        return Err(ReminderError::InvalidInput(format!(
            "appointment {} is {}, only SCHEDULED appointments get reminders",
            appointment.id,
            appointment.status.as_str()
        )));
    }
    if appointment.start_time <= now {
        return Err(ReminderError::InvalidInput(format!(
            "appointment {} starts at {}, which is not in the future",
            appointment.id, appointment.start_time
        )));
    }
    if appointment.end_time < appointment.start_time {
        return Err(ReminderError::InvalidInput(format!(
            "appointment {} ends before it starts",
            appointment.id
        )));
    }
    if appointment.contact().is_none() {
        return Err(ReminderError::InvalidInput(format!(
            "appointment {} has no recipient contact",
            appointment.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellhop_core::ManualClock;
    use bellhop_queue::{JobState, SqliteJobQueue};
    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;

    fn setup() -> (Scheduler, Arc<SqliteJobQueue>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
        ));
        let queue = Arc::new(
            SqliteJobQueue::new(
                Connection::open_in_memory().unwrap(),
                clock.clone(),
                Duration::minutes(5),
            )
            .unwrap(),
        );
        (Scheduler::new(queue.clone(), clock.clone()), queue, clock)
    }

    fn appointment_in(clock: &ManualClock, lead: Duration) -> Appointment {
        let start = clock.now() + lead;
        Appointment {
            id: AppointmentId::from("appt-7"),
            start_time: start,
            end_time: start + Duration::hours(1),
            status: AppointmentStatus::Scheduled,
            recipient_contact: Some("pat@example.com".into()),
            counterparty_name: None,
            notes: None,
            join_reference: None,
        }
    }

    #[test]
    fn far_future_gets_all_three() {
        let (scheduler, _queue, clock) = setup();
        let appt = appointment_in(&clock, Duration::hours(48));
        let result = scheduler.schedule(&appt).unwrap();

        assert_eq!(result.kinds(), ReminderKind::ALL.to_vec());
        assert!(result.skipped.is_empty());
        let fire_times: Vec<_> = result.scheduled.iter().map(|r| r.fire_at).collect();
        assert_eq!(
            fire_times,
            vec![
                appt.start_time - Duration::hours(24),
                appt.start_time - Duration::hours(1),
                appt.start_time - Duration::minutes(2),
            ]
        );
    }

    #[test]
    fn thirty_minutes_out_only_at_time() {
        let (scheduler, _queue, clock) = setup();
        let appt = appointment_in(&clock, Duration::minutes(30));
        let result = scheduler.schedule(&appt).unwrap();
        assert_eq!(result.kinds(), vec![ReminderKind::AtTime]);
        assert_eq!(result.skipped, vec![ReminderKind::H24, ReminderKind::H1]);
    }

    #[test]
    fn inside_two_minute_window_schedules_nothing() {
        let (scheduler, queue, clock) = setup();
        let appt = appointment_in(&clock, Duration::seconds(90));
        let result = scheduler.schedule(&appt).unwrap();
        assert!(result.scheduled.is_empty());
        assert_eq!(result.skipped.len(), 3);
        assert_eq!(queue.stats(0).unwrap().pending, 0);
    }

    #[test]
    fn rejects_past_start_and_missing_contact() {
        let (scheduler, queue, clock) = setup();

        let past = appointment_in(&clock, Duration::minutes(-5));
        assert!(matches!(
            scheduler.schedule(&past),
            Err(ReminderError::InvalidInput(_))
        ));

        let mut blank = appointment_in(&clock, Duration::hours(3));
        blank.recipient_contact = Some("   ".into());
        assert!(matches!(
            scheduler.schedule(&blank),
            Err(ReminderError::InvalidInput(_))
        ));

        assert_eq!(queue.stats(0).unwrap().pending, 0);
    }

    #[test]
    fn rejects_appointments_that_are_not_scheduled() {
        let (scheduler, queue, clock) = setup();
        for status in [
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
            AppointmentStatus::InProgress,
        ] {
            let mut appt = appointment_in(&clock, Duration::hours(30));
            appt.status = status;
            let err = scheduler.schedule(&appt).unwrap_err();
            assert!(
                matches!(&err, ReminderError::InvalidInput(msg) if msg.contains(status.as_str())),
                "{status:?}: {err}"
            );
        }
        assert_eq!(queue.stats(0).unwrap().pending, 0);
        assert!(queue.jobs_for(&AppointmentId::from("appt-7")).unwrap().is_empty());
    }

    #[test]
    fn scheduling_twice_keeps_one_job_per_kind() {
        let (scheduler, queue, clock) = setup();
        let appt = appointment_in(&clock, Duration::hours(30));
        let first = scheduler.schedule(&appt).unwrap();
        assert!(first.scheduled.iter().all(|r| !r.replaced));

        let second = scheduler.schedule(&appt).unwrap();
        assert!(second.scheduled.iter().all(|r| r.replaced));

        let jobs = queue.jobs_for(&appt.id).unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.state == JobState::Pending));
        let h1 = JobKey::derive(&appt.id, ReminderKind::H1);
        assert_eq!(jobs.iter().filter(|j| j.job_key == h1).count(), 1);
    }

    #[test]
    fn payload_carries_start_snapshot() {
        let (scheduler, queue, clock) = setup();
        let appt = appointment_in(&clock, Duration::hours(2));
        scheduler.schedule(&appt).unwrap();

        clock.set(appt.start_time - Duration::hours(1));
        let claim = queue.dequeue_due().unwrap().unwrap();
        let payload: ReminderPayload = serde_json::from_str(&claim.payload).unwrap();
        assert_eq!(payload.kind, ReminderKind::H1);
        assert_eq!(payload.snapshot_start_time, appt.start_time);
        assert_eq!(payload.recipient_contact.as_deref(), Some("pat@example.com"));
    }
}
