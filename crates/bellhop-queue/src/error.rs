use thiserror::Error;

/// Errors raised by the queue backend. Callers treat every variant as
/// "backend unavailable" for the operation at hand.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A previous holder of the connection panicked.
    #[error("Queue connection lock poisoned")]
    Poisoned,

    /// A stored row could not be decoded.
    #[error("Corrupt job row {job_key}: {reason}")]
    Corrupt { job_key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;
