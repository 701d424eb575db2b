use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use boxoffice_shared::{Event, Ticket};
use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub artist: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub total_seats: i32,
    pub price: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct TicketQuery {
    #[serde(default)]
    pub available: bool,
}

const MAX_SEATS: i32 = 100_000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events", post(create_event).get(list_events))
        .route("/v1/events/{id}", get(get_event))
        .route("/v1/events/{id}/tickets", get(list_tickets))
        .route("/v1/events/{id}/outcomes", get(outcome_stream))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/events
/// Creates the event and one available ticket per seat.
pub async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if req.total_seats <= 0 || req.total_seats > MAX_SEATS {
        return Err(AppError::BadRequest(format!(
            "total_seats must be between 1 and {}",
            MAX_SEATS
        )));
    }
    if !req.price.is_finite() || req.price < 0.0 {
        return Err(AppError::BadRequest("price must be a non-negative number".to_string()));
    }

    let event = Event::new(req.name, req.artist, req.venue, req.date, req.total_seats, req.price);
    state.repos.events.create(&event).await?;
    state.repos.tickets.create_many(&event.issue_tickets()).await?;
    info!(event_id = %event.id, seats = event.total_seats, "Event created");

    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/events
pub async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.repos.events.list().await?))
}

/// GET /v1/events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.repos.events.get_by_id(event_id).await?))
}

/// GET /v1/events/{id}/tickets?available=true
pub async fn list_tickets(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    state.repos.events.get_by_id(event_id).await?;

    let tickets = if query.available {
        state.repos.tickets.list_available_by_event(event_id).await?
    } else {
        state.repos.tickets.list_by_event(event_id).await?
    };
    Ok(Json(tickets))
}

/// GET /v1/events/{id}/outcomes
/// Server-sent stream of booking outcomes for one event.
pub async fn outcome_stream(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    state.repos.events.get_by_id(event_id).await?;

    let stream =
        BroadcastStream::new(state.processor.subscribe()).filter_map(move |message| async move {
            match message {
                Ok(outcome) if outcome.event_id == event_id => SseEvent::default()
                    .event("booking_outcome")
                    .json_data(&outcome)
                    .ok()
                    .map(Ok),
                Ok(_) => None,
                Err(e) => {
                    warn!(event_id = %event_id, error = %e, "Outcome stream lagged");
                    None
                }
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
