use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of an appointment, as issued by the booking workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub String);

impl AppointmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AppointmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppointmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of an appointment. Only `Scheduled` appointments get reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// The appointment lifecycle has moved on; no reminder can be useful anymore.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed | AppointmentStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(AppointmentStatus::Scheduled),
            "IN_PROGRESS" => Ok(AppointmentStatus::InProgress),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            "NO_SHOW" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// A consulting session being reminded about.
///
/// `counterparty_name`, `notes` and `join_reference` are forwarded to the
/// notification sender untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_reference: Option<String>,
}

impl Appointment {
    /// Contact address with surrounding whitespace removed; `None` when blank.
    pub fn contact(&self) -> Option<&str> {
        self.recipient_contact
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// The three fixed reminder offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// 24 hours before start.
    H24,
    /// 1 hour before start.
    H1,
    /// 2 minutes before start ("session starting now").
    AtTime,
}

impl ReminderKind {
    /// Every kind, ordered by fire time (earliest first).
    pub const ALL: [ReminderKind; 3] = [ReminderKind::H24, ReminderKind::H1, ReminderKind::AtTime];

    /// How long before the appointment start this reminder fires.
    pub fn offset(&self) -> Duration {
        match self {
            ReminderKind::H24 => Duration::hours(24),
            ReminderKind::H1 => Duration::hours(1),
            ReminderKind::AtTime => Duration::minutes(2),
        }
    }

    /// Absolute fire time for an appointment starting at `start`.
    pub fn fire_at(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start - self.offset()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::H24 => "h24",
            ReminderKind::H1 => "h1",
            ReminderKind::AtTime => "at_time",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReminderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "h24" => Ok(ReminderKind::H24),
            "h1" => Ok(ReminderKind::H1),
            "at_time" => Ok(ReminderKind::AtTime),
            other => Err(format!("unknown reminder kind: {other}")),
        }
    }
}

/// Deterministic queue key for one `(appointment, kind)` pair.
///
/// Format: `rem_{kind}_{sha256(appointment_id)[..24]}`. Scheduling the same
/// pair twice always yields the same key, which is what makes enqueue an
/// upsert and cancellation a keyed delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(pub String);

impl JobKey {
    pub fn derive(appointment_id: &AppointmentId, kind: ReminderKind) -> Self {
        let digest = hex::encode(Sha256::digest(appointment_id.as_str().as_bytes()));
        Self(format!("rem_{}_{}", kind.as_str(), &digest[..24]))
    }

    /// Keys for all three kinds of one appointment, in `ReminderKind::ALL` order.
    pub fn all_for(appointment_id: &AppointmentId) -> [(ReminderKind, JobKey); 3] {
        ReminderKind::ALL.map(|kind| (kind, JobKey::derive(appointment_id, kind)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
