pub mod config;
pub mod error;
pub mod event_locks;
pub mod lifecycle;
pub mod lock_table;
pub mod periodic;
pub mod pricing;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod ticket_locks;

pub use config::{EngineConfig, PricingMode};
pub use error::{BookingError, BookingResult, Stage};
pub use event_locks::{EventLockGuard, EventLockHandle, EventLockStats, EventLockTable};
pub use lock_table::{Lease, LockTableStats};
pub use periodic::{shutdown_channel, PeriodicTask, ShutdownSignal, ShutdownTrigger};
pub use pricing::{FlatRate, PricingRule, StoredPrice};
pub use processor::{Admission, BookingProcessor};
pub use queue::{route, AdmissionQueues, QueueSetStats, QueueStats};
pub use stats::{BookingStats, ProcessorStats};
pub use ticket_locks::{Acquired, TicketLock, TicketLockTable};
