//! Persistence seam.
//!
//! [`Store`] covers reads and single-statement writes. Anything that has to be
//! all-or-nothing goes through a [`UnitOfWork`] obtained from [`Store::begin`]:
//! the seat claim, booking insert and transaction insert of a reservation, the
//! paired status changes of a settlement, the per-booking refund steps.
//!
//! Every status change is conditional (`from` -> `to`) and reports whether a row
//! actually moved, so callers can tell a lost race from a success. Edges outside
//! the status lifecycle are refused with [`StoreError::IllegalTransition`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{
    Booking, BookingItem, BookingStatus, Event, EventStatus, EventUpdate, NewBooking, NewEvent,
    NewRefund, NewTransaction, Refund, Seat, Transaction, TransactionChange, TransactionStatus,
    UnknownVariant, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value outside the closed enumerations: schema-version mismatch.
    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// A status change the lifecycle does not allow; a caller bug, never retried.
    #[error("illegal {entity} transition {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

/// Status enums with a fixed lifecycle. Both stores refuse an edge outside it
/// before touching a row.
pub(crate) trait Lifecycle: Copy {
    const ENTITY: &'static str;

    fn name(self) -> &'static str;

    fn allows(self, next: Self) -> bool;
}

impl Lifecycle for BookingStatus {
    const ENTITY: &'static str = "booking";

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn allows(self, next: Self) -> bool {
        self.can_transition_to(next)
    }
}

impl Lifecycle for TransactionStatus {
    const ENTITY: &'static str = "transaction";

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn allows(self, next: Self) -> bool {
        self.can_transition_to(next)
    }
}

impl Lifecycle for EventStatus {
    const ENTITY: &'static str = "event";

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn allows(self, next: Self) -> bool {
        self.can_transition_to(next)
    }
}

pub(crate) fn ensure_transition<S: Lifecycle>(from: S, to: S) -> Result<(), StoreError> {
    if from.allows(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            entity: S::ENTITY,
            from: from.name(),
            to: to.name(),
        })
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Inserts the event and its `capacity` seats atomically.
    async fn create_event(&self, new: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError>;

    /// Applies `update` to an AVAILABLE event whose capacity does not exceed the new
    /// one, creating the extra seats. `None` when no such event exists.
    async fn update_event(
        &self,
        event_id: i64,
        update: &EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError>;

    async fn transition_event(
        &self,
        event_id: i64,
        from: EventStatus,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn find_event(&self, event_id: i64) -> Result<Option<Event>, StoreError>;

    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;

    async fn list_seats(&self, event_id: i64) -> Result<Vec<Seat>, StoreError>;

    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, StoreError>;

    async fn find_booking(&self, booking_id: i64) -> Result<Option<Booking>, StoreError>;

    /// Newest first.
    async fn list_user_bookings(&self, user_id: i64) -> Result<Vec<Booking>, StoreError>;

    /// Bookings of an event restricted to `statuses`; an empty slice means all.
    async fn list_event_bookings(
        &self,
        event_id: i64,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError>;

    /// Bookings of every event restricted to `statuses` (empty means all), newest first.
    async fn list_bookings(&self, statuses: &[BookingStatus]) -> Result<Vec<Booking>, StoreError>;

    /// PENDING bookings whose payment window closed before `now`.
    async fn list_overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    async fn booking_seat_ids(&self, booking_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn find_transaction(&self, booking_id: i64) -> Result<Option<Transaction>, StoreError>;

    async fn list_refunds(&self, booking_id: i64) -> Result<Vec<Refund>, StoreError>;

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError>;
}

/// One atomic unit of work. Dropping it without [`commit`](UnitOfWork::commit)
/// rolls everything back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Locks the event against concurrent status changes and returns its status.
    async fn lock_event_status(&mut self, event_id: i64) -> Result<Option<EventStatus>, StoreError>;

    /// Compare-and-set on the seat's availability flag. Returns the seat price when
    /// the seat belonged to `event_id` and was free; `None` otherwise.
    async fn claim_seat(&mut self, event_id: i64, seat_id: i64) -> Result<Option<Decimal>, StoreError>;

    /// Marks the seat available. Releasing a free seat is a no-op.
    async fn release_seat(&mut self, seat_id: i64) -> Result<(), StoreError>;

    async fn booking_seat_ids(&mut self, booking_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError>;

    async fn insert_booking_item(&mut self, item: BookingItem) -> Result<(), StoreError>;

    async fn transition_booking(
        &mut self,
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError>;

    async fn find_transaction(&mut self, booking_id: i64) -> Result<Option<Transaction>, StoreError>;

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, StoreError>;

    async fn transition_transaction(
        &mut self,
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
        change: &TransactionChange,
    ) -> Result<bool, StoreError>;

    async fn insert_refund(&mut self, new: &NewRefund) -> Result<Refund, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
