//! `bellhop-queue`: durable, delay-capable reminder job queue on SQLite.
//!
//! # Overview
//!
//! Jobs live in the `reminder_jobs` table, keyed by a deterministic
//! [`JobKey`](bellhop_core::JobKey). Enqueueing an existing key replaces the
//! job; deleting a missing key is a no-op. Workers claim due jobs under a
//! lease that expires after a visibility timeout, so a crashed worker's job
//! is delivered again.
//!
//! # Job states
//!
//! | State       | Meaning                                               |
//! |-------------|-------------------------------------------------------|
//! | `pending`   | Waiting for `fire_at`                                 |
//! | `running`   | Claimed by a worker; lease not yet acknowledged       |
//! | `fired`     | Consumed; `outcome` records what the worker decided   |
//! | `discarded` | Given up after retries or a permanent failure         |

pub mod db;
pub mod error;
pub mod queue;
pub mod sqlite;
pub mod types;

pub use error::{QueueError, Result};
pub use queue::JobQueue;
pub use sqlite::SqliteJobQueue;
pub use types::{ClaimedJob, DeleteOutcome, JobRecord, JobRef, JobState, NewJob, QueueStats};
