use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Transaction, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Paid,
    Expired,
    Refunded,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Paid,
        BookingStatus::Expired,
        BookingStatus::Refunded,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Paid => "PAID",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Refunded => "REFUNDED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Active bookings hold their seats.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Paid)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match self {
            Pending => matches!(next, Paid | Expired | Cancelled),
            Paid => matches!(next, Refunded),
            Expired | Refunded | Cancelled => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("booking status", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub status: BookingStatus,
    pub total_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// The payment window is closed strictly after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookingItem {
    pub booking_id: i64,
    pub seat_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: i64,
    pub event_id: i64,
    pub total_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Booking snapshot returned to callers: the booking, the seats it holds and its
/// payment record, if any.
#[derive(Debug, Clone, Serialize)]
pub struct BookingWithPayment {
    #[serde(flatten)]
    pub booking: Booking,
    pub seat_ids: Vec<i64>,
    pub transaction: Option<Transaction>,
}
