//! Reminder job payload and delivery directive, shared between the
//! scheduling side (which writes payloads) and the executor (which reads
//! them back and builds directives for the notification sender).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Appointment, AppointmentId, JobKey, ReminderKind};

/// Stored as JSON in the `reminder_jobs.payload` column.
///
/// `snapshot_start_time` is the appointment's start time when the job was
/// enqueued. The executor compares it with the live start time to detect a
/// reschedule; the remaining fields are informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub appointment_id: AppointmentId,
    pub kind: ReminderKind,
    pub snapshot_start_time: DateTime<Utc>,
    pub snapshot_end_time: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_reference: Option<String>,
}

impl ReminderPayload {
    pub fn snapshot(appointment: &Appointment, kind: ReminderKind) -> Self {
        Self {
            appointment_id: appointment.id.clone(),
            kind,
            snapshot_start_time: appointment.start_time,
            snapshot_end_time: appointment.end_time,
            fire_at: kind.fire_at(appointment.start_time),
            recipient_contact: appointment.contact().map(String::from),
            counterparty_name: appointment.counterparty_name.clone(),
            notes: appointment.notes.clone(),
            join_reference: appointment.join_reference.clone(),
        }
    }
}

/// What the notification sender is asked to deliver. Always built from the
/// *current* appointment record, never from the payload snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDirective {
    pub job_key: JobKey,
    pub kind: ReminderKind,
    pub appointment_id: AppointmentId,
    pub recipient_contact: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_reference: Option<String>,
}

impl ReminderDirective {
    pub fn new(
        job_key: JobKey,
        kind: ReminderKind,
        appointment: &Appointment,
        recipient_contact: &str,
    ) -> Self {
        Self {
            job_key,
            kind,
            appointment_id: appointment.id.clone(),
            recipient_contact: recipient_contact.to_string(),
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            counterparty_name: appointment.counterparty_name.clone(),
            notes: appointment.notes.clone(),
            join_reference: appointment.join_reference.clone(),
        }
    }
}
