use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_core::StoreError;
use boxoffice_engine::BookingError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, bool) {
        match self {
            AppError::Booking(e) => {
                let status = match e {
                    BookingError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
                    BookingError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
                    BookingError::LockConflict { .. } => StatusCode::CONFLICT,
                    BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                    BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
                    BookingError::InvalidTransition { .. } | BookingError::Expired(_) => {
                        StatusCode::CONFLICT
                    }
                    BookingError::PersistenceFailure { .. } | BookingError::ShuttingDown => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, e.kind(), e.is_retryable())
            }
            AppError::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found", false)
            }
            AppError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict", false),
            AppError::Store(StoreError::Backend(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence_failure", true)
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_failed", false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, retryable) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": kind,
            "message": self.to_string(),
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}
