use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::UnknownVariant;

pub const EVENT_CANCELLED_REASON: &str = "event cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Completed => "COMPLETED",
            RefundStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for RefundStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RefundStatus::Pending),
            "COMPLETED" => Ok(RefundStatus::Completed),
            "FAILED" => Ok(RefundStatus::Failed),
            other => Err(UnknownVariant::new("refund status", other)),
        }
    }
}

/// Back-reference record for money returned on a paid booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub booking_id: i64,
    pub amount: Decimal,
    pub reason: String,
    pub status: RefundStatus,
    pub refund_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub booking_id: i64,
    pub amount: Decimal,
    pub reason: String,
    pub status: RefundStatus,
    pub refund_date: DateTime<Utc>,
}
