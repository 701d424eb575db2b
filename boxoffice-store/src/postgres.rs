use async_trait::async_trait;
use boxoffice_core::{
    BookingRepository, EventRepository, StoreError, StoreResult, TicketRepository, UserRepository,
};
use boxoffice_shared::{Booking, BookingStatus, Event, Masked, Ticket, TicketStatus, User};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{backend, from_sqlx};

// Internal row types; statuses travel as TEXT.

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: Masked::new(row.email),
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    artist: String,
    venue: String,
    date: DateTime<Utc>,
    total_seats: i32,
    price: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            name: row.name,
            artist: row.artist,
            venue: row.venue,
            date: row.date,
            total_seats: row.total_seats,
            price: row.price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    seat_number: i32,
    status: String,
    price: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status: TicketStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("ticket {}: {}", row.id, e)))?;
        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            seat_number: row.seat_number,
            status,
            price: row.price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    ticket_ids: Vec<Uuid>,
    status: String,
    total_amount: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status: BookingStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("booking {}: {}", row.id, e)))?;
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            ticket_ids: row.ticket_ids,
            status,
            total_amount: row.total_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(user.email.expose())
        .bind(&user.name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(from_sqlx("user", id))
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, created_at, updated_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(from_sqlx("user", email))
    }
}

pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn create(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, name, artist, venue, date, total_seats, price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.artist)
        .bind(&event.venue)
        .bind(event.date)
        .bind(event.total_seats)
        .bind(event.price)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Event> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, name, artist, venue, date, total_seats, price, created_at, updated_at
            FROM events WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map(Event::from)
        .map_err(from_sqlx("event", id))
    }

    async fn list(&self) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, name, artist, venue, date, total_seats, price, created_at, updated_at
            FROM events ORDER BY date ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks the listed rows, checks every one is in `from`, then moves them
    /// all to `to` in the same transaction.
    async fn transition(
        &self,
        ticket_ids: &[Uuid],
        from: TicketStatus,
        to: TicketStatus,
    ) -> StoreResult<()> {
        if ticket_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, status FROM tickets WHERE id = ANY($1) FOR UPDATE")
                .bind(ticket_ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(backend)?;

        for id in ticket_ids {
            match rows.iter().find(|(row_id, _)| row_id == id) {
                None => return Err(StoreError::not_found("ticket", id)),
                Some((_, status)) if status.as_str() != from.as_str() => {
                    return Err(StoreError::Conflict(format!(
                        "ticket {} is {}, expected {}",
                        id, status, from
                    )));
                }
                Some(_) => {}
            }
        }

        sqlx::query("UPDATE tickets SET status = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(to.as_str())
            .bind(ticket_ids)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn create_many(&self, tickets: &[Ticket]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets
                    (id, event_id, seat_number, status, price, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.event_id)
            .bind(ticket.seat_number)
            .bind(ticket.status.as_str())
            .bind(ticket.price)
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT id, event_id, seat_number, status, price, created_at, updated_at
            FROM tickets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx("ticket", id))?;
        Ticket::try_from(row)
    }

    async fn list_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT id, event_id, seat_number, status, price, created_at, updated_at
            FROM tickets WHERE event_id = $1
            ORDER BY seat_number ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(Ticket::try_from)
        .collect()
    }

    async fn list_available_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT id, event_id, seat_number, status, price, created_at, updated_at
            FROM tickets WHERE event_id = $1 AND status = 'available'
            ORDER BY seat_number ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(Ticket::try_from)
        .collect()
    }

    async fn reserve_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        self.transition(ticket_ids, TicketStatus::Available, TicketStatus::Reserved)
            .await
    }

    async fn confirm_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        self.transition(ticket_ids, TicketStatus::Reserved, TicketStatus::Sold)
            .await
    }

    async fn release_tickets(&self, ticket_ids: &[Uuid]) -> StoreResult<()> {
        self.transition(ticket_ids, TicketStatus::Reserved, TicketStatus::Available)
            .await
    }
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BOOKING_COLUMNS: &str =
    "id, user_id, event_id, ticket_ids, status, total_amount, created_at, updated_at, expires_at";

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create(&self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, user_id, event_id, ticket_ids, status, total_amount,
                created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.event_id)
        .bind(&booking.ticket_ids)
        .bind(booking.status.as_str())
        .bind(booking.total_amount)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx("booking", id))?;
        Booking::try_from(row)
    }

    async fn list_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Booking>> {
        sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(Booking::try_from)
        .collect()
    }

    async fn update(&self, booking: &Booking) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, total_amount = $3, updated_at = $4, expires_at = $5
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.total_amount)
        .bind(booking.updated_at)
        .bind(booking.expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("booking", booking.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("booking", id));
        }
        Ok(())
    }
}
