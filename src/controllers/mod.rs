pub mod admin;
pub mod bookings;
pub mod events;
pub mod payment;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(admin::routes())
}

/// Full application router: `/health` plus everything under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", routes())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
