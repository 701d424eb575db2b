use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::event_locks::EventLockStats;
use crate::lock_table::LockTableStats;
use crate::queue::QueueSetStats;

/// Counters shared by every queue worker. Each update is a single atomic
/// increment, so concurrent completions never lose counts.
pub struct BookingStats {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl BookingStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Admission refused before the request reached a queue.
    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> Counters {
        Counters {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_bookings: self.successful.load(Ordering::Relaxed),
            failed_bookings: self.failed.load(Ordering::Relaxed),
            rejected_admissions: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(
        &self,
        queues: QueueSetStats,
        ticket_locks: LockTableStats,
        event_locks: EventLockStats,
    ) -> ProcessorStats {
        let counters = self.counters();
        let uptime = self.started.elapsed().as_secs_f64();
        let requests_per_second = if uptime > 0.0 {
            counters.total_requests as f64 / uptime
        } else {
            0.0
        };

        ProcessorStats {
            total_requests: counters.total_requests,
            successful_bookings: counters.successful_bookings,
            failed_bookings: counters.failed_bookings,
            rejected_admissions: counters.rejected_admissions,
            queue_length: queues.total_pending,
            started_at: self.started_at,
            uptime_seconds: uptime,
            requests_per_second,
            queue_stats: queues,
            lock_stats: ticket_locks,
            event_lock_stats: event_locks,
        }
    }
}

impl Default for BookingStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total_requests: u64,
    pub successful_bookings: u64,
    pub failed_bookings: u64,
    pub rejected_admissions: u64,
}

/// Point-in-time view of the booking engine, served to monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub total_requests: u64,
    pub successful_bookings: u64,
    pub failed_bookings: u64,
    pub rejected_admissions: u64,
    pub queue_length: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub requests_per_second: f64,
    pub queue_stats: QueueSetStats,
    pub lock_stats: LockTableStats,
    pub event_lock_stats: EventLockStats,
}
