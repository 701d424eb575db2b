use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::Ticket;

/// A show with a fixed number of seats, all sold at the same list price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub artist: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub total_seats: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: String,
        artist: String,
        venue: String,
        date: DateTime<Utc>,
        total_seats: i32,
        price: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            artist,
            venue,
            date,
            total_seats,
            price,
            created_at: now,
            updated_at: now,
        }
    }

    /// One available ticket per seat, numbered from 1.
    pub fn issue_tickets(&self) -> Vec<Ticket> {
        (1..=self.total_seats)
            .map(|seat| Ticket::new(self.id, seat, self.price))
            .collect()
    }
}
