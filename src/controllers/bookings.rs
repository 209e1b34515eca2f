use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/bookings", get(list_user_bookings).post(create_booking))
}

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(length(min = 1, max = 50))]
    pub seat_ids: Vec<i64>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let booking = state
        .bookings
        .create_booking(user.user_id, req.event_id, &req.seat_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
async fn list_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let bookings = state.bookings.list_user_bookings(user.user_id).await?;
    Ok(Json(bookings))
}
