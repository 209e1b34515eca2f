pub mod booking;
pub mod event;
pub mod refund;
pub mod seat;
pub mod transaction;
pub mod user;

pub use booking::{Booking, BookingItem, BookingStatus, BookingWithPayment, NewBooking};
pub use event::{Event, EventStatus, EventUpdate, EventWithSeats, NewEvent};
pub use refund::{NewRefund, Refund, RefundStatus, EVENT_CANCELLED_REASON};
pub use seat::Seat;
pub use transaction::{
    NewTransaction, PaymentMethod, Transaction, TransactionChange, TransactionStatus,
};
pub use user::User;

/// A stored or submitted enum value that this build does not know.
///
/// Statuses are a closed set; anything else means the row was written by a
/// different schema version and must not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
