use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::lock_table::{Lease, LockTable};
use crate::periodic::{shutdown_channel, PeriodicTask, ShutdownTrigger};

/// Shared handle to an event's mutual-exclusion lock.
pub type EventLockHandle = Arc<AsyncMutex<()>>;

struct EventLock {
    handle: EventLockHandle,
    last_used: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ref_count: i64,
}

impl Lease for EventLock {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl EventLock {
    /// Someone outside the table still has the handle (and may be inside the
    /// critical section); dropping the entry now would let a second mutex
    /// appear for the same event.
    fn handle_in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }

    fn is_evictable_at(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        if self.handle_in_use() {
            return false;
        }
        let idle_too_long = self.ref_count <= 0 && now >= self.last_used + max_idle;
        !self.is_live_at(now) || idle_too_long
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EventLockStats {
    pub total_locks: usize,
    /// Entries with at least one outstanding `get_lock`.
    pub active_locks: usize,
    pub total_refs: i64,
    pub ttl_seconds: i64,
    pub max_idle_seconds: i64,
}

/// Coarse, reference-counted lock per event.
///
/// Unlike the ticket table this is advisory mutual exclusion: `get_lock` hands
/// back the event's mutex and the caller runs its own critical section, then
/// calls `release_lock`. The table owns a background sweep that drops entries
/// past their TTL or idle with no references; a sweep never drops an entry
/// whose handle is still out, so an in-progress holder is never split from
/// later callers.
pub struct EventLockTable {
    table: LockTable<Uuid, EventLock>,
    ttl: Duration,
    max_idle: Duration,
    sweeper: Mutex<Option<(ShutdownTrigger, PeriodicTask)>>,
}

impl EventLockTable {
    /// Table without a background sweep; call `sweep_expired` yourself.
    pub fn new(ttl: Duration, max_idle: Duration) -> Self {
        Self {
            table: LockTable::new(),
            ttl,
            max_idle,
            sweeper: Mutex::new(None),
        }
    }

    /// Table with its own sweep every `sweep_interval`. Stop it with `shutdown`.
    pub fn start(
        ttl: Duration,
        max_idle: Duration,
        sweep_interval: std::time::Duration,
    ) -> Arc<Self> {
        let table = Arc::new(Self::new(ttl, max_idle));
        let (trigger, signal) = shutdown_channel();
        let weak: Weak<Self> = Arc::downgrade(&table);

        let task = PeriodicTask::spawn("event_lock_sweep", sweep_interval, signal, move || {
            if let Some(table) = weak.upgrade() {
                let removed = table.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept idle event locks");
                }
            }
        });

        *table.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some((trigger, task));
        table
    }

    pub fn get_lock(&self, event_id: Uuid) -> EventLockHandle {
        self.get_lock_at(event_id, Utc::now())
    }

    /// Returns the event's mutex, creating the entry on first use. Bumps the
    /// reference count and pushes out the expiry.
    pub fn get_lock_at(&self, event_id: Uuid, now: DateTime<Utc>) -> EventLockHandle {
        let mut entries = self.table.write();
        let entry = entries.entry(event_id).or_insert_with(|| EventLock {
            handle: Arc::new(AsyncMutex::new(())),
            last_used: now,
            expires_at: now + self.ttl,
            ref_count: 0,
        });
        entry.last_used = now;
        entry.expires_at = now + self.ttl;
        entry.ref_count += 1;
        entry.handle.clone()
    }

    pub fn release_lock(&self, event_id: Uuid) {
        self.release_lock_at(event_id, Utc::now())
    }

    /// Drops one reference. At zero the entry becomes eligible for idle eviction.
    pub fn release_lock_at(&self, event_id: Uuid, now: DateTime<Utc>) {
        let mut entries = self.table.write();
        match entries.get_mut(&event_id) {
            Some(entry) if entry.ref_count > 0 => {
                entry.ref_count -= 1;
                entry.last_used = now;
            }
            Some(_) => warn!(event_id = %event_id, "Event lock released more times than acquired"),
            None => debug!(
                event_id = %event_id,
                "Release for an event lock that was already swept"
            ),
        }
    }

    /// Acquires the event's mutex and releases the reference when the guard
    /// drops. Dropping the future while it waits releases the reference too.
    pub async fn lock(&self, event_id: Uuid) -> EventLockGuard<'_> {
        let handle = self.get_lock(event_id);
        let reference = EventRef {
            table: self,
            event_id,
        };
        let guard = handle.lock_owned().await;
        EventLockGuard {
            _guard: guard,
            reference,
        }
    }

    pub fn ref_count(&self, event_id: Uuid) -> Option<i64> {
        self.table.read().get(&event_id).map(|e| e.ref_count)
    }

    pub fn contains(&self, event_id: Uuid) -> bool {
        self.table.read().contains_key(&event_id)
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let max_idle = self.max_idle;
        self.table.evict_where(|entry| entry.is_evictable_at(now, max_idle))
    }

    pub fn stats(&self) -> EventLockStats {
        let entries = self.table.read();
        EventLockStats {
            total_locks: entries.len(),
            active_locks: entries.values().filter(|e| e.ref_count > 0).count(),
            total_refs: entries.values().map(|e| e.ref_count).sum(),
            ttl_seconds: self.ttl.num_seconds(),
            max_idle_seconds: self.max_idle.num_seconds(),
        }
    }

    /// Stops the background sweep, if one was started. Idempotent.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some((trigger, task)) = sweeper {
            trigger.trigger();
            task.join().await;
        }
    }
}

/// One counted reference from `get_lock`, given back on drop.
struct EventRef<'a> {
    table: &'a EventLockTable,
    event_id: Uuid,
}

impl Drop for EventRef<'_> {
    fn drop(&mut self) {
        self.table.release_lock(self.event_id);
    }
}

/// Held event lock. Unlocks the mutex, then releases the table reference.
pub struct EventLockGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    reference: EventRef<'a>,
}

impl EventLockGuard<'_> {
    pub fn event_id(&self) -> Uuid {
        self.reference.event_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn table() -> EventLockTable {
        EventLockTable::new(Duration::minutes(30), Duration::minutes(5))
    }

    #[test]
    fn test_same_handle_per_event_and_ref_counting() {
        let locks = table();
        let event = Uuid::new_v4();

        let a = locks.get_lock(event);
        let b = locks.get_lock(event);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.ref_count(event), Some(2));

        let other = locks.get_lock(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &other));

        locks.release_lock(event);
        locks.release_lock(event);
        assert_eq!(locks.ref_count(event), Some(0));

        // Extra releases don't drive the count negative
        locks.release_lock(event);
        assert_eq!(locks.ref_count(event), Some(0));
    }

    #[test]
    fn test_idle_entries_evicted_after_grace_period() {
        let locks = table();
        let event = Uuid::new_v4();
        let t0 = Utc::now();

        drop(locks.get_lock_at(event, t0));
        locks.release_lock_at(event, t0);

        assert_eq!(locks.sweep_expired_at(t0 + Duration::minutes(4)), 0);
        assert!(locks.contains(event));

        assert_eq!(locks.sweep_expired_at(t0 + Duration::minutes(5)), 1);
        assert!(!locks.contains(event));
    }

    #[test]
    fn test_referenced_entry_survives_idle_but_not_ttl() {
        let locks = table();
        let event = Uuid::new_v4();
        let t0 = Utc::now();

        // Leaked reference: counted, but the handle itself was dropped.
        drop(locks.get_lock_at(event, t0));

        assert_eq!(locks.sweep_expired_at(t0 + Duration::minutes(10)), 0);
        assert_eq!(locks.sweep_expired_at(t0 + Duration::minutes(30)), 1);
    }

    #[test]
    fn test_sweep_never_drops_entry_with_outstanding_handle() {
        let locks = table();
        let event = Uuid::new_v4();
        let t0 = Utc::now();

        let handle = locks.get_lock_at(event, t0);
        locks.release_lock_at(event, t0);

        assert_eq!(locks.sweep_expired_at(t0 + Duration::hours(2)), 0);
        assert!(Arc::ptr_eq(&handle, &locks.get_lock(event)));

        drop(handle);
        locks.release_lock(event);
        assert_eq!(locks.sweep_expired_at(Utc::now() + Duration::hours(2)), 1);
    }

    #[test]
    fn test_stats() {
        let locks = table();
        let busy = Uuid::new_v4();
        let idle = Uuid::new_v4();

        drop(locks.get_lock(busy));
        drop(locks.get_lock(busy));
        drop(locks.get_lock(idle));
        locks.release_lock(idle);

        let stats = locks.stats();
        assert_eq!(stats.total_locks, 2);
        assert_eq!(stats.active_locks, 1);
        assert_eq!(stats.total_refs, 2);
        assert_eq!(stats.ttl_seconds, 1800);
        assert_eq!(stats.max_idle_seconds, 300);
    }

    #[tokio::test]
    async fn test_guard_serializes_critical_sections() {
        let locks = Arc::new(table());
        let event = Uuid::new_v4();
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock(event).await;
                    let now = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(StdDuration::from_millis(2)).await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(locks.ref_count(event), Some(0));
    }

    #[tokio::test]
    async fn test_abandoned_wait_gives_back_its_reference() {
        let locks = table();
        let event = Uuid::new_v4();

        let holder = locks.lock(event).await;
        let waited =
            tokio::time::timeout(StdDuration::from_millis(20), locks.lock(event)).await;
        assert!(waited.is_err());
        assert_eq!(locks.ref_count(event), Some(1));

        drop(holder);
        assert_eq!(locks.ref_count(event), Some(0));
        assert_eq!(locks.sweep_expired_at(Utc::now() + Duration::minutes(6)), 1);
        assert!(!locks.contains(event));
    }

    #[tokio::test]
    async fn test_background_sweep_stops_on_shutdown() {
        let locks = EventLockTable::start(
            Duration::milliseconds(1),
            Duration::milliseconds(1),
            StdDuration::from_millis(10),
        );
        let event = Uuid::new_v4();
        drop(locks.get_lock(event));
        locks.release_lock(event);

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(!locks.contains(event));

        locks.shutdown().await;
        locks.shutdown().await;

        drop(locks.get_lock(event));
        locks.release_lock(event);
        tokio::time::sleep(StdDuration::from_millis(40)).await;
        assert!(locks.contains(event));
    }
}
