use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("requested time overlaps existing booking {0}")]
    Conflict(Ulid),
    #[error("cannot change booking status from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("facility {0} still has pending or confirmed bookings")]
    FacilityInUse(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    JournalError(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
