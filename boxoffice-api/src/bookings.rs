use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use boxoffice_engine::ProcessorStats;
use boxoffice_shared::{Booking, BookingRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitBookingRequest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    /// Caller-chosen id; generated when absent.
    pub request_id: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBookingResponse {
    pub request_id: String,
    pub queue: usize,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingActionRequest {
    pub user_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(submit_booking))
        .route("/v1/bookings/stats", get(booking_stats))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/confirm", post(confirm_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/bookings
/// Admission only. The booking is created asynchronously by the engine.
pub async fn submit_booking(
    State(state): State<AppState>,
    Json(req): Json<SubmitBookingRequest>,
) -> Result<(StatusCode, Json<SubmitBookingResponse>), AppError> {
    let mut request = BookingRequest::new(req.user_id, req.event_id, req.ticket_ids);
    if let Some(id) = req.request_id.filter(|id| !id.trim().is_empty()) {
        request = request.with_id(id);
    }
    if let Some(priority) = req.priority {
        request = request.with_priority(priority);
    }

    let admission = state.processor.submit(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBookingResponse {
            request_id: admission.request_id,
            queue: admission.queue,
            status: "queued".to_string(),
        }),
    ))
}

/// GET /v1/bookings/stats
pub async fn booking_stats(State(state): State<AppState>) -> Json<ProcessorStats> {
    Json(state.processor.stats())
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.processor.get_booking(booking_id).await?))
}

/// POST /v1/bookings/{id}/confirm
pub async fn confirm_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<BookingActionRequest>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state
            .processor
            .confirm_booking(booking_id, req.user_id)
            .await?,
    ))
}

/// POST /v1/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<BookingActionRequest>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(
        state
            .processor
            .cancel_booking(booking_id, req.user_id)
            .await?,
    ))
}
