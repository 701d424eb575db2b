use async_trait::async_trait;
use boxoffice_core::{StoreResult, TicketRepository};
use std::sync::Arc;
use uuid::Uuid;

/// Computes a booking's total from the tickets it holds.
#[async_trait]
pub trait PricingRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn price(&self, ticket_ids: &[Uuid]) -> StoreResult<f64>;
}

/// Same price for every ticket.
pub struct FlatRate {
    unit_price: f64,
}

impl FlatRate {
    pub fn new(unit_price: f64) -> Self {
        Self { unit_price }
    }
}

#[async_trait]
impl PricingRule for FlatRate {
    fn name(&self) -> &'static str {
        "flat"
    }

    async fn price(&self, ticket_ids: &[Uuid]) -> StoreResult<f64> {
        Ok(self.unit_price * ticket_ids.len() as f64)
    }
}

/// Sum of each ticket's stored price. A ticket the store doesn't know fails
/// the whole computation.
pub struct StoredPrice {
    tickets: Arc<dyn TicketRepository>,
}

impl StoredPrice {
    pub fn new(tickets: Arc<dyn TicketRepository>) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl PricingRule for StoredPrice {
    fn name(&self) -> &'static str {
        "stored"
    }

    async fn price(&self, ticket_ids: &[Uuid]) -> StoreResult<f64> {
        let mut total = 0.0;
        for ticket_id in ticket_ids {
            total += self.tickets.get_by_id(*ticket_id).await?.price;
        }
        Ok(total)
    }
}
