use crate::domain::models::{CoachId, Session, SessionId, SessionStatus};
use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("the requested slot is no longer available")]
    SlotNoLongerAvailable,
    /// The old session was cancelled but its replacement could not be booked.
    #[error(
        "reschedule cancelled session {cancelled_id} but booking the new slot failed: {cause}",
        cancelled_id = .cancelled.id
    )]
    PartialRescheduleFailure {
        cancelled: Box<Session>,
        cause: Box<SchedulingError>,
    },
    #[error("session {0} not found")]
    NotFound(SessionId),
    /// No availability template is stored for the coach.
    #[error("coach {0} not found")]
    CoachNotFound(CoachId),
    #[error("session {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error(transparent)]
    Storage(#[from] InfraError),
}
