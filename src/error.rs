//! error.rs
//!
//! Ошибки хранилища и бизнес-ошибки сервиса бронирования.
//!
//! `StoreError` описывает сбои на границе с БД. `BookingError` это то, что
//! видит вызывающая сторона: бизнес-отказы возвращаются как есть, а любые
//! внутренние сбои схлопываются в `Internal` без деталей (детали уходят в лог).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Ошибки слоя хранения.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    /// Нарушен инвариант данных: счётчик мест вне границ, бронь без события и т.п.
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Класс ошибки, от него зависит код ответа.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    AccessDenied,
    DeadlineExceeded,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    // 400
    #[error("incorrect event id provided")]
    InvalidEventId,
    #[error("incorrect booking id provided")]
    InvalidBookingId,
    #[error("incorrect user id provided")]
    InvalidUserId,
    #[error("incomplete data provided to create event: {0}")]
    IncompleteEvent(String),
    #[error("event date cannot be in the past")]
    EventInPast,

    // 404
    #[error("requested event id not found")]
    EventNotFound,
    #[error("requested booking id not found")]
    BookingNotFound,

    // 403
    #[error("you don't have enough permissions to complete this operation")]
    AccessDenied,

    // 409
    #[error("the event you are trying to book has expired")]
    EventExpired,
    #[error("no more seats to book for this event")]
    NoSeatsAvailable,
    #[error("requested event not available for deletion, it still has bookings")]
    EventBusy,
    #[error("requested booking is already confirmed")]
    BookingAlreadyConfirmed,
    #[error("requested booking is already cancelled")]
    BookingAlreadyCancelled,
    #[error("requested booking confirmation deadline has expired")]
    BookingExpired,

    #[error("request deadline exceeded, the operation may have completed")]
    DeadlineExceeded,

    // 500
    #[error("something went wrong, try again later")]
    Internal,
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        use BookingError::*;
        match self {
            InvalidEventId | InvalidBookingId | InvalidUserId | IncompleteEvent(_) | EventInPast => {
                ErrorKind::Validation
            }
            EventNotFound | BookingNotFound => ErrorKind::NotFound,
            AccessDenied => ErrorKind::AccessDenied,
            EventExpired | NoSeatsAvailable | EventBusy | BookingAlreadyConfirmed
            | BookingAlreadyCancelled | BookingExpired => ErrorKind::Conflict,
            DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Internal => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
