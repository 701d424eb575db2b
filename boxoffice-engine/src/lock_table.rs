//! Keyed table of self-expiring entries, shared by the ticket and event lock tables.
//!
//! All mutation of an entry (owner, expiry, reference count) happens while the
//! table's write lock is held. Reads that only need to look (stats, `is_locked`)
//! take the read lock. Expiry is always checked against the caller's `now`, so
//! a lapsed entry is treated as absent even before a sweep removes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An entry that stops counting as held once `expires_at` passes.
pub trait Lease {
    fn expires_at(&self) -> DateTime<Utc>;

    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockTableStats {
    pub total_locks: usize,
    pub active_locks: usize,
    /// Past expiry but not yet swept.
    pub expired_locks: usize,
}

pub struct LockTable<K, E> {
    entries: RwLock<HashMap<K, E>>,
}

impl<K, E> LockTable<K, E>
where
    K: Eq + Hash,
    E: Lease,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    // A panic while holding the lock can't leave an entry half-written (every
    // mutation is a single insert/remove/field store), so poisoning is ignored.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<K, E>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, E>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every entry `evict` selects, returning how many went.
    pub fn evict_where<F>(&self, mut evict: F) -> usize
    where
        F: FnMut(&E) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !evict(entry));
        before - entries.len()
    }

    /// Drops every entry past its expiry.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        self.evict_where(|entry| !entry.is_live_at(now))
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> LockTableStats {
        let entries = self.read();
        let active_locks = entries.values().filter(|e| e.is_live_at(now)).count();
        LockTableStats {
            total_locks: entries.len(),
            active_locks,
            expired_locks: entries.len() - active_locks,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<K, E> Default for LockTable<K, E>
where
    K: Eq + Hash,
    E: Lease,
{
    fn default() -> Self {
        Self::new()
    }
}
