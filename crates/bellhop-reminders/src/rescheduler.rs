use bellhop_core::Appointment;
use serde::Serialize;
use tracing::instrument;

use crate::{
    canceller::{CancelResult, Canceller},
    error::Result,
    scheduler::{ScheduleResult, Scheduler},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RescheduleResult {
    pub cancelled: CancelResult,
    pub scheduled: ScheduleResult,
}

/// Cancel followed by schedule, using the appointment's new times.
///
/// The two steps are not atomic. If the process dies in between, jobs left
/// behind carry the old start time and the executor skips them as stale.
pub struct Rescheduler {
    canceller: Canceller,
    scheduler: Scheduler,
}

impl Rescheduler {
    pub fn new(canceller: Canceller, scheduler: Scheduler) -> Self {
        Self {
            canceller,
            scheduler,
        }
    }

    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub fn reschedule(&self, appointment: &Appointment) -> Result<RescheduleResult> {
        let cancelled = self.canceller.cancel(&appointment.id)?;
        let scheduled = self.scheduler.schedule(appointment)?;
        Ok(RescheduleResult {
            cancelled,
            scheduled,
        })
    }
}
