use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use uuid::Uuid;

use crate::lock_table::{Lease, LockTable, LockTableStats};

/// Exclusive, self-expiring claim on one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketLock {
    pub ticket_id: Uuid,
    pub holder: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease for TicketLock {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// How a successful acquisition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The ticket was free or its previous lock had lapsed.
    New,
    /// `owner` already held a live lock; only its expiry moved.
    Refreshed,
}

/// One holder per ticket, owner-checked, non-blocking.
///
/// `try_acquire` never waits: on contention it answers `false` at once so the
/// caller can back off and release whatever siblings it already holds.
pub struct TicketLockTable {
    table: LockTable<Uuid, TicketLock>,
    ttl: Duration,
}

impl TicketLockTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            table: LockTable::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn try_acquire(&self, ticket_id: Uuid, owner: Uuid) -> bool {
        self.try_acquire_at(ticket_id, owner, Utc::now())
    }

    pub fn try_acquire_at(&self, ticket_id: Uuid, owner: Uuid, now: DateTime<Utc>) -> bool {
        self.acquire_at(ticket_id, owner, now).is_some()
    }

    pub fn acquire(&self, ticket_id: Uuid, owner: Uuid) -> Option<Acquired> {
        self.acquire_at(ticket_id, owner, Utc::now())
    }

    /// Takes the lock if it's free or lapsed; refreshes it if `owner` already
    /// holds it; refuses (`None`) if someone else holds a live lock.
    pub fn acquire_at(
        &self,
        ticket_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Option<Acquired> {
        let expires_at = now + self.ttl;
        let fresh = TicketLock {
            ticket_id,
            holder: owner,
            acquired_at: now,
            expires_at,
        };
        let mut entries = self.table.write();

        match entries.entry(ticket_id) {
            Entry::Occupied(mut slot) => {
                let lock = slot.get_mut();
                if !lock.is_live_at(now) {
                    *lock = fresh;
                    return Some(Acquired::New);
                }
                if lock.holder != owner {
                    return None;
                }
                lock.expires_at = expires_at;
                Some(Acquired::Refreshed)
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Some(Acquired::New)
            }
        }
    }

    /// Removes the lock only if `owner` recorded it. Never touches anyone else's.
    pub fn release(&self, ticket_id: Uuid, owner: Uuid) -> bool {
        let mut entries = self.table.write();
        let owned = entries
            .get(&ticket_id)
            .is_some_and(|lock| lock.holder == owner);
        if owned {
            entries.remove(&ticket_id);
        }
        owned
    }

    /// Releases each ticket held by `owner`; returns how many were actually removed.
    pub fn release_all(&self, ticket_ids: &[Uuid], owner: Uuid) -> usize {
        ticket_ids
            .iter()
            .filter(|ticket_id| self.release(**ticket_id, owner))
            .count()
    }

    pub fn is_locked(&self, ticket_id: Uuid) -> bool {
        self.is_locked_at(ticket_id, Utc::now())
    }

    pub fn is_locked_at(&self, ticket_id: Uuid, now: DateTime<Utc>) -> bool {
        self.table
            .read()
            .get(&ticket_id)
            .is_some_and(|lock| lock.is_live_at(now))
    }

    /// The live lock on a ticket, if any.
    pub fn holder(&self, ticket_id: Uuid) -> Option<TicketLock> {
        self.holder_at(ticket_id, Utc::now())
    }

    pub fn holder_at(&self, ticket_id: Uuid, now: DateTime<Utc>) -> Option<TicketLock> {
        self.table
            .read()
            .get(&ticket_id)
            .filter(|lock| lock.is_live_at(now))
            .cloned()
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.table.sweep_at(now)
    }

    pub fn stats(&self) -> LockTableStats {
        self.table.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> LockTableStats {
        self.table.stats_at(now)
    }
}
