use serde::Deserialize;
use std::time::Duration;

/// How a booking's total amount is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    /// `unit_price` × ticket count.
    #[default]
    Flat,
    /// Sum of each ticket's stored price.
    Stored,
}

/// Tunables for the booking engine. Built once at startup and handed to
/// `BookingProcessor::start`; the engine never reads files or the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue_count: usize,
    pub queue_buffer: usize,
    pub ticket_lock_ttl: Duration,
    pub event_lock_ttl: Duration,
    pub event_lock_max_idle: Duration,
    pub sweep_interval: Duration,
    pub booking_hold: Duration,
    pub pricing: PricingMode,
    pub unit_price: f64,
    /// Capacity of the outcome broadcast channel.
    pub outcome_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_count: 3,
            queue_buffer: 100,
            ticket_lock_ttl: Duration::from_secs(10 * 60),
            event_lock_ttl: Duration::from_secs(30 * 60),
            event_lock_max_idle: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            booking_hold: Duration::from_secs(15 * 60),
            pricing: PricingMode::Flat,
            unit_price: 50.0,
            outcome_buffer: 1024,
        }
    }
}

/// Saturates instead of failing on durations chrono can't represent.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
