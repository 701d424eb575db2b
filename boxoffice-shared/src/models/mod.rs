mod booking;
mod event;
mod request;
mod ticket;
mod user;

pub use booking::{Booking, BookingStatus};
pub use event::Event;
pub use request::BookingRequest;
pub use ticket::{Ticket, TicketStatus};
pub use user::User;

/// Returned when a persisted status string doesn't match any known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}
