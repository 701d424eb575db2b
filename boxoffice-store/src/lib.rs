pub mod app_config;
pub mod database;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod redis_repo;

pub use app_config::{BookingRules, Config, StorageMode};
pub use database::DbClient;
pub use memory::InMemoryStore;
pub use postgres::{PgBookingRepository, PgEventRepository, PgTicketRepository, PgUserRepository};
pub use redis_repo::{CacheError, CachedEventRepository, CachedUserRepository, RedisClient};
