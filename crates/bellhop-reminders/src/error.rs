use bellhop_queue::QueueError;
use thiserror::Error;

/// Errors surfaced synchronously to appointment-lifecycle callers.
#[derive(Debug, Error)]
pub enum ReminderError {
    /// The appointment cannot be scheduled (past start, no contact, bad window).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The job queue could not complete the operation.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReminderError {
    pub fn code(&self) -> &'static str {
        match self {
            ReminderError::InvalidInput(_) => "INVALID_INPUT",
            ReminderError::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
            ReminderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReminderError>;

/// Appointment store failures. The executor treats all of them as transient.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Corrupt appointment row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Outcome of a failed notification send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Worth retrying: timeout, connection failure, 5xx, rate limit.
    #[error("Transient send failure: {0}")]
    Transient(String),

    /// Will never succeed, e.g. a rejected recipient address.
    #[error("Permanent send failure: {0}")]
    Permanent(String),
}
