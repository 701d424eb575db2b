use async_trait::async_trait;
use boxoffice_core::{
    BookingRepository, EventRepository, StoreError, StoreResult, TicketRepository, UserRepository,
};
use boxoffice_shared::{Booking, Event, Ticket, TicketStatus, User};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, Event>,
    tickets: HashMap<Uuid, Ticket>,
    bookings: HashMap<Uuid, Booking>,
}

/// Process-local store behind a single async `RwLock`. Serves the `memory`
/// storage mode and the test suites.
///
/// The `fail_*` switches make the next matching call return a backend error,
/// once, so compensation paths can be driven from tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_create_booking: AtomicBool,
    fail_reserve: AtomicBool,
    fail_delete_booking: AtomicBool,
    fail_update_booking: AtomicBool,
    fail_confirm: AtomicBool,
    fail_release: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create_booking(&self) {
        self.fail_create_booking.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_reserve(&self) {
        self.fail_reserve.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_delete_booking(&self) {
        self.fail_delete_booking.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_update_booking(&self) {
        self.fail_update_booking.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_confirm(&self) {
        self.fail_confirm.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.read().await.bookings.len()
    }

    fn injected(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected failure: {}", what)));
        }
        Ok(())
    }

    /// Moves every listed ticket from `from` to `to`, or none of them.
    async fn transition(
        &self,
        ticket_ids: &[Uuid],
        from: TicketStatus,
        to: TicketStatus,
    ) -> StoreResult<()> {
        if ticket_ids.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().await;
        for id in ticket_ids {
            let ticket = tables
                .tickets
                .get(id)
                .ok_or_else(|| StoreError::not_found("ticket", id))?;
            if ticket.status != from {
                return Err(StoreError::Conflict(format!(
                    "ticket {} is {}, expected {}",
                    id, ticket.status, from
                )));
            }
        }

        for id in ticket_ids {
            if let Some(ticket) = tables.tickets.get_mut(id) {
                ticket.set_status(to);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!(
                "email {} already registered",
                user.email.redacted()
            )));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        self.tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.expose() == email)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", email))
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn create(&self, event: &Event) -> StoreResult<()> {
        self.tables.write().await.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Event> {
        self.tables
            .read()
            .await
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("event", id))
    }

    async fn list(&self) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self.tables.read().await.events.values().cloned().collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn create_many(&self, tickets: &[Ticket]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        for ticket in tickets {
            tables.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Ticket> {
        self.tables
            .read()
            .await
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ticket", id))
    }

    async fn list_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .tables
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.seat_number);
        Ok(tickets)
    }

    async fn list_available_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let mut tickets = TicketRepository::list_by_event(self, event_id).await?;
        tickets.retain(|t| t.status == TicketStatus::Available);
        Ok(tickets)
    }

    async fn reserve_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        Self::injected(&self.fail_reserve, "reserve_tickets")?;
        self.transition(ticket_ids, TicketStatus::Available, TicketStatus::Reserved)
            .await
    }

    async fn confirm_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        Self::injected(&self.fail_confirm, "confirm_tickets")?;
        self.transition(ticket_ids, TicketStatus::Reserved, TicketStatus::Sold)
            .await
    }

    async fn release_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        Self::injected(&self.fail_release, "release_tickets")?;
        self.transition(ticket_ids, TicketStatus::Reserved, TicketStatus::Available)
            .await
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn create(&self, booking: &Booking) -> StoreResult<()> {
        Self::injected(&self.fail_create_booking, "create_booking")?;
        let mut tables = self.tables.write().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(StoreError::Conflict(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Booking> {
        self.tables
            .read()
            .await
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("booking", id))
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables
            .read()
            .await
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn update(&self, booking: &Booking) -> StoreResult<()> {
        Self::injected(&self.fail_update_booking, "update_booking")?;
        let mut tables = self.tables.write().await;
        match tables.bookings.get_mut(&booking.id) {
            Some(existing) => {
                *existing = booking.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("booking", booking.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        Self::injected(&self.fail_delete_booking, "delete_booking")?;
        self.tables
            .write()
            .await
            .bookings
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("booking", id))
    }
}
