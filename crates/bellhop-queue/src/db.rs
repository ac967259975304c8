use rusqlite::Connection;

use crate::error::Result;

/// Initialise the queue schema in `conn`.
///
/// Creates the `reminder_jobs` table (idempotent), an index on
/// `(state, fire_at_ms)` for the due-job query and one on `appointment_id`
/// for per-appointment listings.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminder_jobs (
            job_key           TEXT    NOT NULL PRIMARY KEY,
            appointment_id    TEXT    NOT NULL,
            kind              TEXT    NOT NULL,
            payload           TEXT    NOT NULL,   -- JSON-encoded ReminderPayload
            state             TEXT    NOT NULL DEFAULT 'pending',
            fire_at_ms        INTEGER NOT NULL,   -- unix millis
            attempt           INTEGER NOT NULL DEFAULT 0,
            lease_id          TEXT,               -- set while running
            lease_expires_ms  INTEGER,
            outcome           TEXT,               -- set once fired/discarded
            last_error        TEXT,
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_reminder_jobs_due
            ON reminder_jobs (state, fire_at_ms);
        CREATE INDEX IF NOT EXISTS idx_reminder_jobs_appointment
            ON reminder_jobs (appointment_id);
        ",
    )?;
    Ok(())
}
