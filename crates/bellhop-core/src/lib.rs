//! `bellhop-core`: types shared by the reminder queue, the scheduling
//! components and the gateway binary.

pub mod clock;
pub mod config;
pub mod error;
pub mod reminder;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BellhopError, Result};
pub use reminder::{ReminderDirective, ReminderPayload};
pub use types::{Appointment, AppointmentId, AppointmentStatus, JobKey, ReminderKind};
