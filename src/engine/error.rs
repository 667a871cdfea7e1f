use ulid::Ulid;

use crate::model::{BookingStatus, TimeSlot};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    EmailTaken(String),
    /// The candidate slot overlaps this occupying booking.
    Conflict(Ulid),
    FacilityUnavailable(Ulid),
    OutsideOperatingHours(TimeSlot),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The acting user does not own the document.
    NotOwner(Ulid),
    InvalidCredentials,
    Validation(String),
    LimitExceeded(&'static str),
    Internal(String),
    WalError(String),
}

impl EngineError {
    /// Storage failures may succeed on retry; everything else is a verdict.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }

    /// Message safe to show to the person who made the request.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotFound(_) => "Not found".into(),
            EngineError::Conflict(_) => {
                "This time slot is already booked. Please choose a different time.".into()
            }
            EngineError::NotOwner(_) => "Not allowed".into(),
            EngineError::WalError(_) => "Storage unavailable, please try again".into(),
            EngineError::Internal(_) => "Something went wrong, please try again".into(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::EmailTaken(email) => write!(f, "Email {email} is already registered"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::FacilityUnavailable(_) => {
                write!(f, "Facility is not available for booking")
            }
            EngineError::OutsideOperatingHours(hours) => {
                write!(f, "Booking must be within operating hours ({} to {})", hours.start, hours.end)
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "Cannot change booking from {from} to {to}")
            }
            EngineError::NotOwner(id) => write!(f, "not owner of {id}"),
            EngineError::InvalidCredentials => write!(f, "Invalid email or password"),
            EngineError::Validation(msg) => f.write_str(msg),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::model::TimeError> for EngineError {
    fn from(e: crate::model::TimeError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<crate::model::UnknownVariant> for EngineError {
    fn from(e: crate::model::UnknownVariant) -> Self {
        EngineError::Validation(e.to_string())
    }
}
