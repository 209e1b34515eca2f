use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::error::AppResult;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/{id}", get(get_event))
}

// GET /api/events
async fn list_events(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let events = state.events.list_events().await?;
    Ok(Json(events))
}

// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let event = state.events.get_event_with_seats(event_id).await?;
    Ok(Json(event))
}
