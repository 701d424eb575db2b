use anyhow::{bail, Context};
use boxoffice_core::RepositoryContainer;
use boxoffice_engine::{BookingProcessor, EngineConfig, PricingMode};
use boxoffice_store::{
    BookingRules, CachedEventRepository, CachedUserRepository, Config, DbClient, InMemoryStore,
    PgBookingRepository, PgEventRepository, PgTicketRepository, PgUserRepository, RedisClient,
    StorageMode,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub repos: RepositoryContainer,
    pub processor: Arc<BookingProcessor>,
}

impl AppState {
    pub fn new(repos: RepositoryContainer, processor: Arc<BookingProcessor>) -> Self {
        Self { repos, processor }
    }
}

pub fn engine_config(rules: &BookingRules) -> anyhow::Result<EngineConfig> {
    let pricing = match rules.pricing.as_str() {
        "flat" => PricingMode::Flat,
        "stored" => PricingMode::Stored,
        other => bail!("unknown pricing rule '{}', expected 'flat' or 'stored'", other),
    };

    Ok(EngineConfig {
        queue_count: rules.queue_count,
        queue_buffer: rules.queue_buffer,
        ticket_lock_ttl: Duration::from_secs(rules.ticket_lock_ttl_secs),
        event_lock_ttl: Duration::from_secs(rules.event_lock_ttl_secs),
        event_lock_max_idle: Duration::from_secs(rules.event_lock_max_idle_secs),
        sweep_interval: Duration::from_secs(rules.sweep_interval_secs),
        booking_hold: Duration::from_secs(rules.booking_hold_secs),
        pricing,
        unit_price: rules.unit_price,
        ..EngineConfig::default()
    })
}

/// Builds the repositories for the configured storage mode, with the Redis
/// cache in front of users and events when `redis.url` is set.
pub async fn build_repositories(config: &Config) -> anyhow::Result<RepositoryContainer> {
    let mut repos = match config.storage.mode {
        StorageMode::Memory => {
            info!("Using in-memory storage");
            RepositoryContainer::from_single(Arc::new(InMemoryStore::new()))
        }
        StorageMode::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("storage.mode = postgres requires a [database] section")?;
            let db = DbClient::new(&database.url, database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;

            RepositoryContainer {
                users: Arc::new(PgUserRepository::new(db.pool.clone())),
                events: Arc::new(PgEventRepository::new(db.pool.clone())),
                tickets: Arc::new(PgTicketRepository::new(db.pool.clone())),
                bookings: Arc::new(PgBookingRepository::new(db.pool)),
            }
        }
    };

    if let Some(redis) = &config.redis {
        let cache = RedisClient::new(&redis.url)
            .await
            .context("Invalid Redis URL")?;
        if let Err(e) = cache.ping().await {
            warn!(error = %e, "Redis unreachable at startup; cache reads will fall through");
        }
        repos.users = Arc::new(CachedUserRepository::new(repos.users, cache.clone()));
        repos.events = Arc::new(CachedEventRepository::new(repos.events, cache));
        info!("Redis look-aside cache enabled for users and events");
    }

    Ok(repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_from_rules() {
        let rules = BookingRules {
            queue_count: 5,
            pricing: "stored".to_string(),
            ticket_lock_ttl_secs: 120,
            ..BookingRules::default()
        };
        let config = engine_config(&rules).unwrap();
        assert_eq!(config.queue_count, 5);
        assert_eq!(config.pricing, PricingMode::Stored);
        assert_eq!(config.ticket_lock_ttl, Duration::from_secs(120));
        assert_eq!(config.booking_hold, Duration::from_secs(900));
    }

    #[test]
    fn test_unknown_pricing_rule_is_rejected() {
        let rules = BookingRules {
            pricing: "dynamic".to_string(),
            ..BookingRules::default()
        };
        assert!(engine_config(&rules).is_err());
    }
}
