use std::sync::{Arc, Mutex, MutexGuard};

use bellhop_core::{AppointmentId, Clock, JobKey, ReminderKind};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{QueueError, Result},
    queue::JobQueue,
    types::{ClaimedJob, DeleteOutcome, JobRecord, JobRef, JobState, NewJob, QueueStats},
};

const RECORD_COLUMNS: &str = "job_key, appointment_id, kind, state, fire_at_ms, attempt,
                              outcome, last_error, updated_at";

/// SQLite-backed [`JobQueue`].
///
/// Wraps a single connection in a `Mutex`; several processes may share the
/// same database file, claims run in `IMMEDIATE` transactions so two
/// workers never lease the same job.
pub struct SqliteJobQueue {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

impl SqliteJobQueue {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            visibility_timeout,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| QueueError::Poisoned)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl JobQueue for SqliteJobQueue {
    #[instrument(skip(self, job), fields(job_key = %job.job_key, kind = %job.kind))]
    fn enqueue_delayed(&self, job: NewJob, delay: Duration) -> Result<JobRef> {
        let now = self.now();
        let fire_at = now + delay;
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let replaced = tx
            .query_row(
                "SELECT 1 FROM reminder_jobs
                 WHERE job_key = ?1 AND state IN ('pending', 'running')",
                [job.job_key.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            "INSERT INTO reminder_jobs
             (job_key, appointment_id, kind, payload, state, fire_at_ms, attempt,
              lease_id, lease_expires_ms, outcome, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, NULL, NULL, NULL, NULL, ?6, ?6)
             ON CONFLICT(job_key) DO UPDATE SET
                appointment_id   = excluded.appointment_id,
                kind             = excluded.kind,
                payload          = excluded.payload,
                state            = 'pending',
                fire_at_ms       = excluded.fire_at_ms,
                attempt          = 0,
                lease_id         = NULL,
                lease_expires_ms = NULL,
                outcome          = NULL,
                last_error       = NULL,
                updated_at       = excluded.updated_at",
            params![
                job.job_key.as_str(),
                job.appointment_id.as_str(),
                job.kind.as_str(),
                job.payload,
                fire_at.timestamp_millis(),
                ts(now),
            ],
        )?;
        tx.commit()?;

        debug!(%fire_at, replaced, "job enqueued");
        Ok(JobRef {
            job_key: job.job_key,
            fire_at,
            replaced,
        })
    }

    #[instrument(skip(self, job_key), fields(job_key = %job_key))]
    fn delete(&self, job_key: &JobKey) -> Result<DeleteOutcome> {
        let now_ms = self.now().timestamp_millis();
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(String, Option<i64>)> = tx
            .query_row(
                "SELECT state, lease_expires_ms FROM reminder_jobs WHERE job_key = ?1",
                [job_key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match row {
            None => DeleteOutcome::NotFound,
            Some((state, _)) if state == "pending" => DeleteOutcome::Removed,
            // An expired lease means the worker died; the job can be dropped.
            Some((state, Some(expires))) if state == "running" && expires <= now_ms => {
                DeleteOutcome::Removed
            }
            Some((state, _)) if state == "running" => DeleteOutcome::AlreadyRunning,
            Some(_) => DeleteOutcome::NotFound,
        };

        if outcome == DeleteOutcome::Removed {
            tx.execute("DELETE FROM reminder_jobs WHERE job_key = ?1", [job_key.as_str()])?;
        }
        tx.commit()?;

        debug!(?outcome, "job delete");
        Ok(outcome)
    }

    fn dequeue_due(&self) -> Result<Option<ClaimedJob>> {
        let now = self.now();
        let now_ms = now.timestamp_millis();
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(String, String, String, String, String, u32, i64)> = tx
            .query_row(
                "SELECT job_key, appointment_id, kind, payload, state, attempt, fire_at_ms
                 FROM reminder_jobs
                 WHERE (state = 'pending' AND fire_at_ms <= ?1)
                    OR (state = 'running' AND lease_expires_ms <= ?1)
                 ORDER BY fire_at_ms, job_key
                 LIMIT 1",
                [now_ms],
                |row| {
                    Ok((
                        row.get(0)?, // job_key
                        row.get(1)?, // appointment_id
                        row.get(2)?, // kind
                        row.get(3)?, // payload JSON
                        row.get(4)?, // state
                        row.get(5)?, // attempt
                        row.get(6)?, // fire_at_ms
                    ))
                },
            )
            .optional()?;

        let Some((job_key, appointment_id, kind, payload, state, attempt, fire_at_ms)) = row else {
            return Ok(None);
        };

        let kind: ReminderKind = kind.parse().map_err(|reason| QueueError::Corrupt {
            job_key: job_key.clone(),
            reason,
        })?;
        if state == "running" {
            warn!(job_key = %job_key, attempt, "lease expired, reclaiming job");
        }

        let lease_id = Uuid::new_v4().to_string();
        let attempt = attempt + 1;
        tx.execute(
            "UPDATE reminder_jobs
             SET state = 'running', attempt = ?1, lease_id = ?2, lease_expires_ms = ?3,
                 updated_at = ?4
             WHERE job_key = ?5",
            params![
                attempt,
                lease_id,
                (now + self.visibility_timeout).timestamp_millis(),
                ts(now),
                job_key,
            ],
        )?;
        tx.commit()?;

        Ok(Some(ClaimedJob {
            job_key: JobKey(job_key),
            appointment_id: AppointmentId(appointment_id),
            kind,
            payload,
            attempt,
            fire_at: from_millis(fire_at_ms),
            lease_id,
        }))
    }

    fn requeue(&self, claim: &ClaimedJob, delay: Duration, error: &str) -> Result<bool> {
        let now = self.now();
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE reminder_jobs
             SET state = 'pending', fire_at_ms = ?1, lease_id = NULL, lease_expires_ms = NULL,
                 last_error = ?2, updated_at = ?3
             WHERE job_key = ?4 AND lease_id = ?5 AND state = 'running'",
            params![
                (now + delay).timestamp_millis(),
                error,
                ts(now),
                claim.job_key.as_str(),
                claim.lease_id,
            ],
        )?;
        lease_result(n, claim, "requeue")
    }

    fn complete(&self, claim: &ClaimedJob, outcome: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE reminder_jobs
             SET state = 'fired', outcome = ?1, lease_id = NULL, lease_expires_ms = NULL,
                 updated_at = ?2
             WHERE job_key = ?3 AND lease_id = ?4 AND state = 'running'",
            params![outcome, ts(self.now()), claim.job_key.as_str(), claim.lease_id],
        )?;
        lease_result(n, claim, "complete")
    }

    fn discard(&self, claim: &ClaimedJob, error: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE reminder_jobs
             SET state = 'discarded', outcome = 'discarded', last_error = ?1,
                 lease_id = NULL, lease_expires_ms = NULL, updated_at = ?2
             WHERE job_key = ?3 AND lease_id = ?4 AND state = 'running'",
            params![error, ts(self.now()), claim.job_key.as_str(), claim.lease_id],
        )?;
        lease_result(n, claim, "discard")
    }

    fn get(&self, job_key: &JobKey) -> Result<Option<JobRecord>> {
        let db = self.conn()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM reminder_jobs WHERE job_key = ?1");
        let row = db
            .query_row(&sql, [job_key.as_str()], read_record_row)
            .optional()?;
        row.map(decode_record).transpose()
    }

    fn jobs_for(&self, appointment_id: &AppointmentId) -> Result<Vec<JobRecord>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM reminder_jobs
             WHERE appointment_id = ?1 ORDER BY fire_at_ms, job_key"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([appointment_id.as_str()], read_record_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_record).collect()
    }

    fn stats(&self, next_n: usize) -> Result<QueueStats> {
        let db = self.conn()?;
        let mut stats = QueueStats::default();

        let mut stmt = db.prepare_cached("SELECT state, COUNT(*) FROM reminder_jobs GROUP BY state")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (state, count) in counts {
            let count = count as u64;
            match state.parse::<JobState>() {
                Ok(JobState::Pending) => stats.pending = count,
                Ok(JobState::Running) => stats.in_flight = count,
                Ok(JobState::Fired) => stats.fired = count,
                Ok(JobState::Discarded) => stats.discarded = count,
                Err(e) => warn!("ignoring rows with {e}"),
            }
        }

        let mut stmt = db.prepare_cached(
            "SELECT outcome, COUNT(*) FROM reminder_jobs
             WHERE state IN ('fired', 'discarded') AND outcome IS NOT NULL
             GROUP BY outcome",
        )?;
        stats.outcomes = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<_>>()?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM reminder_jobs
             WHERE state = 'pending' ORDER BY fire_at_ms, job_key LIMIT ?1"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([next_n as i64], read_record_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stats.next_pending = rows.into_iter().map(decode_record).collect::<Result<_>>()?;

        Ok(stats)
    }

    fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.conn()?;
        let next: Option<i64> = db.query_row(
            "SELECT MIN(due) FROM (
                 SELECT fire_at_ms AS due FROM reminder_jobs WHERE state = 'pending'
                 UNION ALL
                 SELECT lease_expires_ms FROM reminder_jobs WHERE state = 'running'
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(next.map(from_millis))
    }

    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM reminder_jobs
             WHERE state IN ('fired', 'discarded') AND updated_at < ?1",
            [ts(older_than)],
        )?;
        if n > 0 {
            info!(count = n, "purged finished reminder jobs");
        }
        Ok(n)
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn lease_result(changed: usize, claim: &ClaimedJob, op: &str) -> Result<bool> {
    if changed == 0 {
        warn!(
            job_key = %claim.job_key,
            attempt = claim.attempt,
            op,
            "lease lost before acknowledgement, ignoring"
        );
    }
    Ok(changed == 1)
}

type RecordRow = (
    String,
    String,
    String,
    String,
    i64,
    u32,
    Option<String>,
    Option<String>,
    String,
);

fn read_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((
        row.get(0)?, // job_key
        row.get(1)?, // appointment_id
        row.get(2)?, // kind
        row.get(3)?, // state
        row.get(4)?, // fire_at_ms
        row.get(5)?, // attempt
        row.get(6)?, // outcome
        row.get(7)?, // last_error
        row.get(8)?, // updated_at
    ))
}

fn decode_record(row: RecordRow) -> Result<JobRecord> {
    let (job_key, appointment_id, kind, state, fire_at_ms, attempt, outcome, last_error, updated_at) =
        row;
    let corrupt = |reason: String| QueueError::Corrupt {
        job_key: job_key.clone(),
        reason,
    };
    let kind: ReminderKind = kind.parse().map_err(corrupt)?;
    let state: JobState = state.parse().map_err(corrupt)?;
    Ok(JobRecord {
        job_key: JobKey(job_key),
        appointment_id: AppointmentId(appointment_id),
        kind,
        state,
        fire_at: from_millis(fire_at_ms),
        attempt,
        outcome,
        last_error,
        updated_at,
    })
}
