use std::sync::Arc;

use bellhop_core::AppointmentId;
use bellhop_queue::{JobQueue, JobRecord, QueueStats};
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Read-only view of the reminder queue for operators and tests.
pub struct Monitor {
    queue: Arc<dyn JobQueue>,
}

impl Monitor {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Counts per state plus the next `next_n` pending jobs by fire time.
    pub fn stats(&self, next_n: usize) -> Result<QueueStats> {
        Ok(self.queue.stats(next_n)?)
    }

    pub fn jobs_for(&self, appointment_id: &AppointmentId) -> Result<Vec<JobRecord>> {
        Ok(self.queue.jobs_for(appointment_id)?)
    }

    pub fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.queue.next_fire_at()?)
    }
}
