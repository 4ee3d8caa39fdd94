use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use super::within_deadline;
use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::models::NewEvent;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", delete(delete_event))
}

// POST /events
async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<impl IntoResponse, BookingError> {
    let Json(event) = payload.map_err(|e| BookingError::IncompleteEvent(e.body_text()))?;

    let created = within_deadline(state.request_timeout, state.service.create_event(event, user.role)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "event": created })),
    ))
}

// GET /events
async fn list_events(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let events = within_deadline(state.request_timeout, state.service.list_events(user.role)).await?;
    Ok(Json(json!({ "success": true, "events": events })))
}

// DELETE /events/{id}
async fn delete_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    within_deadline(state.request_timeout, state.service.delete_event(event_id, user.role)).await?;
    Ok(Json(json!({ "success": true })))
}
