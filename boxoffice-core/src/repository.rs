use std::sync::Arc;

use async_trait::async_trait;
use boxoffice_shared::{Booking, Event, Ticket, User};
use uuid::Uuid;

use crate::StoreResult;

/// Repository trait for user data access
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> StoreResult<()>;

    /// `StoreError::NotFound` when no user has this id.
    async fn get_by_id(&self, id: Uuid) -> StoreResult<User>;

    async fn get_by_email(&self, email: &str) -> StoreResult<User>;
}

/// Repository trait for event data access
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, event: &Event) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Event>;

    async fn list(&self) -> StoreResult<Vec<Event>>;
}

/// Repository trait for ticket data access.
///
/// The batch transitions are all-or-nothing: if any listed ticket is not in
/// the expected source status (or doesn't exist) the whole batch fails and no
/// ticket changes. An empty batch succeeds without touching anything.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create_many(&self, tickets: &[Ticket]) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Ticket>;

    async fn list_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn list_available_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>>;

    /// available → reserved
    async fn reserve_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()>;

    /// reserved → sold
    async fn confirm_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()>;

    /// reserved → available
    async fn release_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()>;
}

/// Repository trait for booking data access
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: &Booking) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Booking>;

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Booking>>;

    async fn update(&self, booking: &Booking) -> StoreResult<()>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

/// The collaborators the booking engine talks to, bundled for wiring.
#[derive(Clone)]
pub struct RepositoryContainer {
    pub users: Arc<dyn UserRepository>,
    pub events: Arc<dyn EventRepository>,
    pub tickets: Arc<dyn TicketRepository>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl RepositoryContainer {
    /// All four contracts served by one backend (e.g. the in-memory store).
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: UserRepository + EventRepository + TicketRepository + BookingRepository + 'static,
    {
        Self {
            users: store.clone(),
            events: store.clone(),
            tickets: store.clone(),
            bookings: store,
        }
    }
}
