use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    pub seat_number: String,
    pub category: String,
    pub price: Decimal,
    pub is_booked: bool,
}
