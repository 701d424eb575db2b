pub mod events;
pub mod models;
pub mod pii;

pub use events::{BookingOutcome, OutcomeResult};
pub use models::{
    Booking, BookingRequest, BookingStatus, Event, Ticket, TicketStatus, User,
};
pub use pii::Masked;
