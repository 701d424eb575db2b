use boxoffice_core::StoreError;
use boxoffice_shared::BookingStatus;
use serde::Serialize;
use uuid::Uuid;

/// Where in the booking protocol a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Admission,
    ValidateUser,
    ValidateEvent,
    LockTickets,
    PriceTickets,
    CreateBooking,
    ReserveTickets,
    Lifecycle,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Admission => "admission",
            Stage::ValidateUser => "validate_user",
            Stage::ValidateEvent => "validate_event",
            Stage::LockTickets => "lock_tickets",
            Stage::PriceTickets => "price_tickets",
            Stage::CreateBooking => "create_booking",
            Stage::ReserveTickets => "reserve_tickets",
            Stage::Lifecycle => "lifecycle",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("Admission queue {queue} is full (capacity {capacity})")]
    AdmissionRejected { queue: usize, capacity: usize },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Ticket {ticket_id} is held by another booker")]
    LockConflict { ticket_id: Uuid },

    #[error("Persistence failure during {stage}: {source}")]
    PersistenceFailure { stage: Stage, source: StoreError },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid booking transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking expired: {0}")]
    Expired(Uuid),

    #[error("Booking engine is shutting down")]
    ShuttingDown,
}

impl BookingError {
    pub fn persistence(stage: Stage, source: StoreError) -> Self {
        BookingError::PersistenceFailure { stage, source }
    }

    /// Stable machine-readable name, used in outcomes and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::AdmissionRejected { .. } => "admission_rejected",
            BookingError::ValidationFailed(_) => "validation_failed",
            BookingError::LockConflict { .. } => "lock_conflict",
            BookingError::PersistenceFailure { .. } => "persistence_failure",
            BookingError::NotFound(_) => "not_found",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::Expired(_) => "expired",
            BookingError::ShuttingDown => "shutting_down",
        }
    }

    /// Only a transient store failure justifies an automatic retry by the caller.
    /// A full queue or a held ticket is the caller's call to back off or give up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::PersistenceFailure { .. })
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
