use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::within_deadline;
use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/my", get(get_user_bookings))
        .route("/bookings/{id}/confirm", post(confirm_booking))
        .route("/bookings/{id}", delete(cancel_booking))
}

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    event_id: i64,
}

// POST /bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let Json(req) = payload.map_err(|_| BookingError::InvalidEventId)?;

    let booking = within_deadline(
        state.request_timeout,
        state.service.book_event(req.event_id, user.user_id),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking })),
    ))
}

// POST /bookings/{id}/confirm
async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    within_deadline(
        state.request_timeout,
        state.service.confirm_booking(booking_id, user.user_id),
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

// DELETE /bookings/{id}
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    within_deadline(
        state.request_timeout,
        state.service.cancel_booking(booking_id, user.user_id),
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

// GET /bookings/my
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = within_deadline(state.request_timeout, state.service.list_user_bookings(user.user_id)).await?;
    Ok(Json(json!({ "success": true, "bookings": bookings })))
}
