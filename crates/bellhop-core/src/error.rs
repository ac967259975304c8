use thiserror::Error;

#[derive(Debug, Error)]
pub enum BellhopError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Appointment not found: {id}")]
    AppointmentNotFound { id: String },
}

impl BellhopError {
    /// Short error code string returned to HTTP clients and printed by the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            BellhopError::Config(_) => "CONFIG_ERROR",
            BellhopError::AppointmentNotFound { .. } => "APPOINTMENT_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, BellhopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BellhopError::Config("bad".into()).code(), "CONFIG_ERROR");
        let err = BellhopError::AppointmentNotFound { id: "a-1".into() };
        assert_eq!(err.code(), "APPOINTMENT_NOT_FOUND");
        assert_eq!(err.to_string(), "Appointment not found: a-1");
    }
}
