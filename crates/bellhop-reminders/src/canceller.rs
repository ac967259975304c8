use std::sync::Arc;

use bellhop_core::{AppointmentId, JobKey, ReminderKind};
use bellhop_queue::{DeleteOutcome, JobQueue};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelledReminder {
    pub kind: ReminderKind,
    pub job_key: JobKey,
    pub outcome: DeleteOutcome,
}

/// Per-kind delete outcomes for one appointment. Absence is not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResult {
    pub appointment_id: AppointmentId,
    pub reminders: Vec<CancelledReminder>,
}

impl CancelResult {
    pub fn count(&self, outcome: DeleteOutcome) -> usize {
        self.reminders.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn removed(&self) -> usize {
        self.count(DeleteOutcome::Removed)
    }
}

/// Deletes the not-yet-fired reminder jobs of an appointment.
///
/// A job that a worker already holds is reported as `already-running` and
/// left alone; the worker re-reads the appointment before sending.
pub struct Canceller {
    queue: Arc<dyn JobQueue>,
}

impl Canceller {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    #[instrument(skip(self, appointment_id), fields(appointment_id = %appointment_id))]
    pub fn cancel(&self, appointment_id: &AppointmentId) -> Result<CancelResult> {
        let mut reminders = Vec::with_capacity(ReminderKind::ALL.len());
        for (kind, job_key) in JobKey::all_for(appointment_id) {
            let outcome = self.queue.delete(&job_key)?;
            reminders.push(CancelledReminder {
                kind,
                job_key,
                outcome,
            });
        }

        let result = CancelResult {
            appointment_id: appointment_id.clone(),
            reminders,
        };
        info!(
            removed = result.removed(),
            already_running = result.count(DeleteOutcome::AlreadyRunning),
            "reminders cancelled"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellhop_core::{Appointment, AppointmentStatus, Clock, ManualClock};
    use bellhop_queue::SqliteJobQueue;
    use chrono::{Duration, TimeZone, Utc};
    use rusqlite::Connection;

    use crate::scheduler::Scheduler;

    #[test]
    fn cancel_reports_each_kind() {
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
        let scheduler = Scheduler::new(queue.clone(), clock.clone());
        let canceller = Canceller::new(queue.clone());

        // 90 minutes out: H1 and AtTime are scheduled, H24 never existed.
        let start = clock.now() + Duration::minutes(90);
        let appt = Appointment {
            id: AppointmentId::from("appt-9"),
            start_time: start,
            end_time: start + Duration::minutes(45),
            status: AppointmentStatus::Scheduled,
            recipient_contact: Some("sam@example.com".into()),
            counterparty_name: None,
            notes: None,
            join_reference: None,
        };
        scheduler.schedule(&appt).unwrap();

        // The H1 job gets claimed by a worker.
        clock.advance(Duration::minutes(30));
        let claim = queue.dequeue_due().unwrap().unwrap();
        assert_eq!(claim.kind, ReminderKind::H1);

        let result = canceller.cancel(&appt.id).unwrap();
        let outcomes: Vec<_> = result.reminders.iter().map(|r| (r.kind, r.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                (ReminderKind::H24, DeleteOutcome::NotFound),
                (ReminderKind::H1, DeleteOutcome::AlreadyRunning),
                (ReminderKind::AtTime, DeleteOutcome::Removed),
            ]
        );

        // Cancelling again is harmless.
        let again = canceller.cancel(&appt.id).unwrap();
        assert_eq!(again.removed(), 0);
        assert_eq!(again.count(DeleteOutcome::NotFound), 2);
    }
}
