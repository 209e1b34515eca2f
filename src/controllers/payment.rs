use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::models::Transaction;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings/{id}/payment", post(process_payment))
        .route("/bookings/{id}/payment-status", get(payment_status))
}

// --- Request/Response структуры ---

/// The method stays a plain string so unknown values reach the payment checks
/// and come back as `INVALID_PAYMENT_METHOD` rather than a body rejection.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub payment_method: String,
}

#[derive(Debug, Serialize)]
struct PaymentResponse {
    #[serde(flatten)]
    transaction: Transaction,
    payment_method_name: Option<&'static str>,
}

// --- HTTP Handlers ---

// POST /api/bookings/{id}/payment
async fn process_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
    Json(req): Json<PaymentRequest>,
) -> AppResult<impl IntoResponse> {
    let transaction = state
        .payments
        .process_payment(booking_id, user.user_id, &req.payment_method)
        .await?;
    let payment_method_name = transaction.payment_method.map(|m| m.display_name());
    Ok(Json(PaymentResponse {
        transaction,
        payment_method_name,
    }))
}

// GET /api/bookings/{id}/payment-status
async fn payment_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.payments.payment_status(booking_id, user.user_id).await?;
    Ok(Json(snapshot))
}
