use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub booking: BookingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Booking engine tunables as they appear in config files. Durations are
/// whole seconds; `pricing` is `flat` or `stored`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BookingRules {
    pub queue_count: usize,
    pub queue_buffer: usize,
    pub ticket_lock_ttl_secs: u64,
    pub event_lock_ttl_secs: u64,
    pub event_lock_max_idle_secs: u64,
    pub sweep_interval_secs: u64,
    pub booking_hold_secs: u64,
    pub unit_price: f64,
    pub pricing: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            queue_count: 3,
            queue_buffer: 100,
            ticket_lock_ttl_secs: 600,
            event_lock_ttl_secs: 1800,
            event_lock_max_idle_secs: 300,
            sweep_interval_secs: 60,
            booking_hold_secs: 900,
            unit_price: 50.0,
            pricing: "flat".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `BOXOFFICE__SERVER__PORT=9000`
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
