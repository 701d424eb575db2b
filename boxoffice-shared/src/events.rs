use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published once per processed booking request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingOutcome {
    pub request_id: String,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    pub result: OutcomeResult,
    pub duration_ms: u64,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeResult {
    Succeeded {
        booking_id: Uuid,
        total_amount: f64,
        expires_at: i64,
    },
    Failed {
        kind: String,
        stage: String,
        message: String,
    },
}

impl BookingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Succeeded { .. })
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        match &self.result {
            OutcomeResult::Succeeded { booking_id, .. } => Some(*booking_id),
            OutcomeResult::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<&str> {
        match &self.result {
            OutcomeResult::Succeeded { .. } => None,
            OutcomeResult::Failed { kind, .. } => Some(kind.as_str()),
        }
    }
}
