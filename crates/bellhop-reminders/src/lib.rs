//! `bellhop-reminders`: scheduling, cancellation and delivery of
//! appointment reminders on top of [`bellhop_queue`].
//!
//! Lifecycle workflows call [`Scheduler`], [`Canceller`] and
//! [`Rescheduler`] after an appointment change commits. The [`Executor`]
//! drains due jobs independently and re-validates every job against the
//! live [`AppointmentStore`] before calling the [`NotificationSender`], so a
//! job that outlived its appointment's state is skipped instead of sent.

pub mod canceller;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod rescheduler;
pub mod scheduler;
pub mod sender;
pub mod store;

pub use canceller::{CancelResult, CancelledReminder, Canceller};
pub use error::{ReminderError, Result, SendError, StoreError};
pub use executor::{Executor, ExecutorConfig, InvalidReason, JobOutcome, StaleReason};
pub use monitor::Monitor;
pub use rescheduler::{RescheduleResult, Rescheduler};
pub use scheduler::{ScheduleResult, ScheduledReminder, Scheduler};
pub use sender::{LogSender, NotificationSender, WebhookSender};
pub use store::{AppointmentStore, InMemoryAppointmentStore, SqliteAppointmentStore};
