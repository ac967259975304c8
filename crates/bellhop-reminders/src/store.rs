//! Appointment store: the source of truth the executor re-reads before
//! every send.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, RwLock},
};

use async_trait::async_trait;
use bellhop_core::{Appointment, AppointmentId, AppointmentStatus, ReminderKind};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::StoreError;

/// Read access to appointments plus an optional bookkeeping hook.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Latest committed state of an appointment, `None` if it does not exist.
    async fn get(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError>;

    /// Note that a reminder went out. Failures never affect delivery.
    async fn record_reminder_sent(
        &self,
        _id: &AppointmentId,
        _kind: ReminderKind,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── SQLite ──────────────────────────────────────────────────────────────────

/// Appointments persisted in the `appointments` table of the gateway database.
///
/// The booking side writes through [`upsert`](Self::upsert) and
/// [`set_status`](Self::set_status); the executor only reads.
pub struct SqliteAppointmentStore {
    db: Mutex<Connection>,
}

impl SqliteAppointmentStore {
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert or replace an appointment. Reminder bookkeeping is preserved.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub fn upsert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO appointments
             (id, start_time, end_time, status, recipient_contact, counterparty_name,
              notes, join_reference, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                start_time        = excluded.start_time,
                end_time          = excluded.end_time,
                status            = excluded.status,
                recipient_contact = excluded.recipient_contact,
                counterparty_name = excluded.counterparty_name,
                notes             = excluded.notes,
                join_reference    = excluded.join_reference,
                updated_at        = excluded.updated_at",
            params![
                appointment.id.as_str(),
                ts(appointment.start_time),
                ts(appointment.end_time),
                appointment.status.as_str(),
                appointment.recipient_contact,
                appointment.counterparty_name,
                appointment.notes,
                appointment.join_reference,
                ts(Utc::now()),
            ],
        )?;
        debug!("appointment stored");
        Ok(())
    }

    /// Change only the status. Returns `false` if the appointment is unknown.
    #[instrument(skip(self, id), fields(appointment_id = %id))]
    pub fn set_status(&self, id: &AppointmentId, status: AppointmentStatus) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), ts(Utc::now()), id.as_str()],
        )?;
        Ok(n == 1)
    }

    pub fn load(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let db = self.conn()?;
        let row = db
            .query_row(
                "SELECT id, start_time, end_time, status, recipient_contact,
                        counterparty_name, notes, join_reference
                 FROM appointments WHERE id = ?1",
                [id.as_str()],
                |row| {
                    Ok(AppointmentRow {
                        id: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                        status: row.get(3)?,
                        recipient_contact: row.get(4)?,
                        counterparty_name: row.get(5)?,
                        notes: row.get(6)?,
                        join_reference: row.get(7)?,
                    })
                },
            )
            .optional()?;
        row.map(row_to_appointment).transpose()
    }

    /// Most recent reminder recorded for an appointment.
    pub fn last_reminder(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<(ReminderKind, DateTime<Utc>)>, StoreError> {
        let db = self.conn()?;
        let row: Option<(Option<String>, Option<String>)> = db
            .query_row(
                "SELECT last_reminder_kind, last_reminder_at FROM appointments WHERE id = ?1",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((Some(kind), Some(at))) = row else {
            return Ok(None);
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.to_string(),
            reason,
        };
        let kind: ReminderKind = kind.parse().map_err(corrupt)?;
        let at = parse_ts(&at).map_err(corrupt)?;
        Ok(Some((kind, at)))
    }
}

#[async_trait]
impl AppointmentStore for SqliteAppointmentStore {
    async fn get(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        self.load(id)
    }

    async fn record_reminder_sent(
        &self,
        id: &AppointmentId,
        kind: ReminderKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "UPDATE appointments SET last_reminder_kind = ?1, last_reminder_at = ?2
             WHERE id = ?3",
            params![kind.as_str(), ts(at), id.as_str()],
        )?;
        Ok(())
    }
}

fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS appointments (
            id                 TEXT PRIMARY KEY,
            start_time         TEXT NOT NULL,
            end_time           TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'SCHEDULED',
            recipient_contact  TEXT,
            counterparty_name  TEXT,
            notes              TEXT,
            join_reference     TEXT,
            last_reminder_kind TEXT,
            last_reminder_at   TEXT,
            updated_at         TEXT NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}

struct AppointmentRow {
    id: String,
    start_time: String,
    end_time: String,
    status: String,
    recipient_contact: Option<String>,
    counterparty_name: Option<String>,
    notes: Option<String>,
    join_reference: Option<String>,
}

fn row_to_appointment(row: AppointmentRow) -> Result<Appointment, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: row.id.clone(),
        reason,
    };
    let start_time = parse_ts(&row.start_time).map_err(corrupt)?;
    let end_time = parse_ts(&row.end_time).map_err(corrupt)?;
    let status: AppointmentStatus = row.status.parse().map_err(corrupt)?;
    Ok(Appointment {
        id: AppointmentId(row.id),
        start_time,
        end_time,
        status,
        recipient_contact: row.recipient_contact,
        counterparty_name: row.counterparty_name,
        notes: row.notes,
        join_reference: row.join_reference,
    })
}

/// Lossless RFC 3339. The executor compares the stored start time with the
/// job snapshot exactly, so sub-millisecond digits must survive the round trip.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// `HashMap`-backed store for tests and embedding.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<AppointmentId, Appointment>>,
    sent: Mutex<Vec<(AppointmentId, ReminderKind, DateTime<Utc>)>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, appointment: Appointment) {
        let mut map = self.appointments.write().unwrap_or_else(|e| e.into_inner());
        map.insert(appointment.id.clone(), appointment);
    }

    pub fn remove(&self, id: &AppointmentId) -> Option<Appointment> {
        let mut map = self.appointments.write().unwrap_or_else(|e| e.into_inner());
        map.remove(id)
    }

    /// Apply `f` to a stored appointment. Returns `false` if it is unknown.
    pub fn update(&self, id: &AppointmentId, f: impl FnOnce(&mut Appointment)) -> bool {
        let mut map = self.appointments.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(id) {
            Some(appointment) => {
                f(appointment);
                true
            }
            None => false,
        }
    }

    /// Every `record_reminder_sent` call, in order.
    pub fn reminders_sent(&self) -> Vec<(AppointmentId, ReminderKind, DateTime<Utc>)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let map = self.appointments.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn record_reminder_sent(
        &self,
        id: &AppointmentId,
        kind: ReminderKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut sent = self.sent.lock().map_err(|_| StoreError::Poisoned)?;
        sent.push((id.clone(), kind, at));
        Ok(())
    }
}
