use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Seat, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Available,
    Cancelled,
    Completed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Available => "AVAILABLE",
            EventStatus::Cancelled => "CANCELLED",
            EventStatus::Completed => "COMPLETED",
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Available)
    }

    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Available, EventStatus::Cancelled)
                | (EventStatus::Available, EventStatus::Completed)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(EventStatus::Available),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            "COMPLETED" => Ok(EventStatus::Completed),
            other => Err(UnknownVariant::new("event status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub date: DateTime<Utc>,
    pub capacity: i32,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_bookable(&self) -> bool {
        self.status == EventStatus::Available
    }
}

/// Input for creating an event together with its seats.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub location: String,
    pub date: DateTime<Utc>,
    pub capacity: i32,
    pub category: String,
    pub price: Decimal,
}

/// Editable details. Capacity may only grow.
#[derive(Debug, Clone)]
pub struct EventUpdate {
    pub name: String,
    pub location: String,
    pub date: DateTime<Utc>,
    pub capacity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventWithSeats {
    pub event: Event,
    pub seats: Vec<Seat>,
}

/// Seat number scheme shared by both stores: `{event_id}-{n}`.
pub fn seat_number(event_id: i64, n: i32) -> String {
    format!("{}-{}", event_id, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_available_events_move() {
        assert!(EventStatus::Available.can_transition_to(EventStatus::Cancelled));
        assert!(EventStatus::Available.can_transition_to(EventStatus::Completed));
        assert!(!EventStatus::Cancelled.can_transition_to(EventStatus::Available));
        assert!(!EventStatus::Completed.can_transition_to(EventStatus::Cancelled));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "POSTPONED".parse::<EventStatus>().unwrap_err();
        assert_eq!(err.value, "POSTPONED");
    }
}
