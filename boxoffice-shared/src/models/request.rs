use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A caller's ask for a set of tickets. Immutable once built; consumed exactly
/// once by a queue worker and never retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRequest {
    pub id: String,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    pub submitted_at: DateTime<Utc>,
    /// Advisory only. Queues are strictly FIFO.
    pub priority: i32,
}

impl BookingRequest {
    pub fn new(user_id: Uuid, event_id: Uuid, ticket_ids: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            event_id,
            ticket_ids,
            submitted_at: Utc::now(),
            priority: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// First ticket id that appears more than once, if any.
    pub fn duplicate_ticket(&self) -> Option<Uuid> {
        let mut seen = HashSet::with_capacity(self.ticket_ids.len());
        self.ticket_ids.iter().copied().find(|id| !seen.insert(*id))
    }
}
