use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;
use crate::worker::WorkerError;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Validation,
    /// Seat already claimed. Retry with a different seat set.
    Contention,
    /// Wrong booking status, already paid, expired. Start a new booking.
    StateConflict,
    Authorization,
    NotFound,
    /// Settled payment that could not be recorded. Needs reconciliation.
    Fatal,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid payment method '{0}'")]
    InvalidPaymentMethod(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("event not found")]
    EventNotFound,

    #[error("event is not available for this operation")]
    EventNotAvailable,

    #[error("one or more seats are not available")]
    SeatUnavailable,

    #[error("forbidden")]
    Unauthorized,

    #[error("booking is not pending")]
    BookingNotPending,

    #[error("payment already made")]
    PaymentAlreadyMade,

    #[error("booking payment window has expired")]
    BookingExpired,

    #[error("payment {external_id} settled for booking {booking_id} but could not be recorded")]
    ReconciliationRequired { booking_id: i64, external_id: String },

    #[error("background queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidPaymentMethod(_) | AppError::Validation(_) => ErrorKind::Validation,
            AppError::SeatUnavailable => ErrorKind::Contention,
            AppError::EventNotAvailable
            | AppError::BookingNotPending
            | AppError::PaymentAlreadyMade
            | AppError::BookingExpired => ErrorKind::StateConflict,
            AppError::Unauthorized => ErrorKind::Authorization,
            AppError::NotFound(_) | AppError::EventNotFound => ErrorKind::NotFound,
            AppError::ReconciliationRequired { .. } => ErrorKind::Fatal,
            AppError::QueueClosed | AppError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidPaymentMethod(_) => "INVALID_PAYMENT_METHOD",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::EventNotFound => "EVENT_NOT_FOUND",
            AppError::EventNotAvailable => "EVENT_NOT_AVAILABLE",
            AppError::SeatUnavailable => "SEAT_UNAVAILABLE",
            AppError::Unauthorized => "FORBIDDEN",
            AppError::BookingNotPending => "BOOKING_NOT_PENDING",
            AppError::PaymentAlreadyMade => "PAYMENT_ALREADY_MADE",
            AppError::BookingExpired => "BOOKING_EXPIRED",
            AppError::ReconciliationRequired { .. } => "RECONCILIATION_REQUIRED",
            AppError::QueueClosed => "SERVICE_UNAVAILABLE",
            AppError::Store(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPaymentMethod(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::EventNotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::SeatUnavailable
            | AppError::EventNotAvailable
            | AppError::BookingNotPending
            | AppError::PaymentAlreadyMade => StatusCode::CONFLICT,
            AppError::BookingExpired => StatusCode::GONE,
            AppError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ReconciliationRequired { .. } | AppError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::QueueClosed => AppError::QueueClosed,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the logs.
        let message = match &self {
            AppError::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn contention_is_distinct_from_state_conflict() {
        assert_eq!(AppError::SeatUnavailable.kind(), ErrorKind::Contention);
        assert_eq!(AppError::PaymentAlreadyMade.kind(), ErrorKind::StateConflict);
        assert_eq!(AppError::BookingExpired.kind(), ErrorKind::StateConflict);
        assert_ne!(AppError::SeatUnavailable.code(), AppError::PaymentAlreadyMade.code());
    }

    #[test]
    fn reconciliation_is_fatal() {
        let err = AppError::ReconciliationRequired {
            booking_id: 4,
            external_id: "PAY-CR-4-x".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ownership_mismatch_is_forbidden() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Unauthorized.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn response_carries_stable_code() {
        let response = AppError::BookingExpired.into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "BOOKING_EXPIRED");
        assert_eq!(body["status"], 410);
    }

    #[tokio::test]
    async fn store_errors_do_not_leak_details() {
        let response = AppError::Store(StoreError::Database(sqlx::Error::RowNotFound)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal server error");
    }
}
