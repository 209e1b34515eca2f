use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AdminUser;
use crate::models::{BookingStatus, EventUpdate, NewEvent};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/events", post(create_event))
        .route("/admin/events/{id}", put(update_event).delete(cancel_event))
        .route("/admin/events/{id}/complete", post(complete_event))
        .route("/admin/events/{id}/bookings", get(event_bookings))
        .route("/admin/bookings", get(all_bookings))
}

// --- Request структуры ---

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    pub date: DateTime<Utc>,
    #[validate(range(min = 1, max = 100000))]
    pub capacity: i32,
    pub category: Option<String>,
    /// Decimal string, e.g. `"25.00"`.
    pub price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEventRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    pub date: DateTime<Utc>,
    #[validate(range(min = 1, max = 100000))]
    pub capacity: i32,
}

// Фильтр броней одного события
#[derive(Debug, Deserialize)]
pub struct BookingFilter {
    /// Comma-separated statuses, case-insensitive.
    pub status: Option<String>,
}

// Фильтр общего списка броней: статусы и порядок по дате создания
#[derive(Debug, Deserialize)]
pub struct AllBookingsFilter {
    pub status: Option<String>,
    /// `asc` or `desc` (default).
    pub order: Option<String>,
}

fn parse_oldest_first(order: Option<&str>) -> AppResult<bool> {
    match order.map(|o| o.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("desc") => Ok(false),
        Some("asc") => Ok(true),
        Some(other) => Err(AppError::Validation(format!("unknown sort order: {}", other))),
    }
}

fn parse_statuses(filter: Option<&str>) -> AppResult<Vec<BookingStatus>> {
    let Some(raw) = filter else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.to_ascii_uppercase()
                .parse::<BookingStatus>()
                .map_err(|e| AppError::Validation(e.to_string()))
        })
        .collect()
}

// --- HTTP Handlers ---

// POST /api/admin/events
async fn create_event(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateEventRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let event = state
        .events
        .create_event(NewEvent {
            name: req.name,
            location: req.location,
            date: req.date,
            capacity: req.capacity,
            category: req.category.unwrap_or_else(|| "REGULAR".to_string()),
            price: req.price,
        })
        .await?;
    tracing::info!(admin_id = admin.user_id, event_id = event.id, "admin created event");
    Ok((StatusCode::CREATED, Json(event)))
}

// PUT /api/admin/events/{id}
async fn update_event(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(event_id): Path<i64>,
    Json(req): Json<UpdateEventRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;
    let event = state
        .events
        .update_event(
            event_id,
            EventUpdate {
                name: req.name,
                location: req.location,
                date: req.date,
                capacity: req.capacity,
            },
        )
        .await?;
    Ok(Json(event))
}

// POST /api/admin/events/{id}/complete
async fn complete_event(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(event_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    state.events.complete_event(event_id).await?;
    Ok(Json(json!({ "event_id": event_id, "status": "COMPLETED" })))
}

// DELETE /api/admin/events/{id}
async fn cancel_event(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(event_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    state.events.cancel_event(event_id).await?;
    tracing::info!(admin_id = admin.user_id, event_id, "admin cancelled event");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "event_id": event_id,
            "status": "CANCELLED",
            "message": "Event cancelled. Refunds are being processed in the background."
        })),
    ))
}

// GET /api/admin/events/{id}/bookings?status=PAID,PENDING
async fn event_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(event_id): Path<i64>,
    Query(filter): Query<BookingFilter>,
) -> AppResult<impl IntoResponse> {
    let statuses = parse_statuses(filter.status.as_deref())?;
    let bookings = state.bookings.list_event_bookings(event_id, &statuses).await?;
    Ok(Json(bookings))
}

// GET /api/admin/bookings?status=PAID&order=asc
async fn all_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(filter): Query<AllBookingsFilter>,
) -> AppResult<impl IntoResponse> {
    let statuses = parse_statuses(filter.status.as_deref())?;
    let oldest_first = parse_oldest_first(filter.order.as_deref())?;
    let bookings = state.bookings.list_all_bookings(&statuses, oldest_first).await?;
    Ok(Json(bookings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_is_case_insensitive_and_comma_separated() {
        assert_eq!(
            parse_statuses(Some("paid, pending")).unwrap(),
            vec![BookingStatus::Paid, BookingStatus::Pending]
        );
        assert!(parse_statuses(None).unwrap().is_empty());
        assert!(matches!(parse_statuses(Some("confirmed")), Err(AppError::Validation(_))));
    }

    #[test]
    fn sort_order_defaults_to_newest_first() {
        assert!(!parse_oldest_first(None).unwrap());
        assert!(!parse_oldest_first(Some("DESC")).unwrap());
        assert!(parse_oldest_first(Some("asc")).unwrap());
        assert!(matches!(parse_oldest_first(Some("sideways")), Err(AppError::Validation(_))));
    }
}
