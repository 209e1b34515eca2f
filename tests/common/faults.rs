//! Store wrapper that shares a `MemoryStore`'s tables and injects failures or
//! stale reads on demand. Every unit-of-work step is recorded so tests can check
//! the order in which rows are touched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use seat_reservation::models::{
    Booking, BookingItem, BookingStatus, Event, EventStatus, EventUpdate, NewBooking, NewEvent,
    NewRefund, NewTransaction, Refund, Seat, Transaction, TransactionChange, TransactionStatus,
    User,
};
use seat_reservation::store::{MemoryStore, Store, StoreError, UnitOfWork};

#[derive(Default)]
struct Faults {
    failing_seat_releases: HashSet<i64>,
    fail_settlement: bool,
    stale_statuses: HashMap<i64, BookingStatus>,
}

#[derive(Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<Mutex<Faults>>,
    ops: Arc<Mutex<Vec<String>>>,
}

fn injected() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::default(),
            ops: Arc::default(),
        }
    }

    /// Releasing `seat_id` inside a unit of work fails.
    pub fn fail_release_of(&self, seat_id: i64) {
        self.faults.lock().failing_seat_releases.insert(seat_id);
    }

    /// Moving a transaction to COMPLETED fails.
    pub fn fail_settlement(&self) {
        self.faults.lock().fail_settlement = true;
    }

    /// Event listings report `status` for the booking regardless of the stored one.
    pub fn report_stale_status(&self, booking_id: i64, status: BookingStatus) {
        self.faults.lock().stale_statuses.insert(booking_id, status);
    }

    /// Unit-of-work steps recorded so far, e.g. `booking 3 PENDING->PAID`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyUnit {
            inner,
            faults: Arc::clone(&self.faults),
            ops: Arc::clone(&self.ops),
        }))
    }

    async fn create_event(&self, new: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError> {
        self.inner.create_event(new, now).await
    }

    async fn update_event(
        &self,
        event_id: i64,
        update: &EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        self.inner.update_event(event_id, update, now).await
    }

    async fn transition_event(
        &self,
        event_id: i64,
        from: EventStatus,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.transition_event(event_id, from, to, now).await
    }

    async fn find_event(&self, event_id: i64) -> Result<Option<Event>, StoreError> {
        self.inner.find_event(event_id).await
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        self.inner.list_events().await
    }

    async fn list_seats(&self, event_id: i64) -> Result<Vec<Seat>, StoreError> {
        self.inner.list_seats(event_id).await
    }

    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, StoreError> {
        self.inner.find_seat(seat_id).await
    }

    async fn find_booking(&self, booking_id: i64) -> Result<Option<Booking>, StoreError> {
        self.inner.find_booking(booking_id).await
    }

    async fn list_user_bookings(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_user_bookings(user_id).await
    }

    async fn list_event_bookings(
        &self,
        event_id: i64,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        let stale = self.faults.lock().stale_statuses.clone();
        let mut bookings = self.inner.list_event_bookings(event_id, &[]).await?;
        for booking in &mut bookings {
            if let Some(status) = stale.get(&booking.id) {
                booking.status = *status;
            }
        }
        bookings.retain(|b| statuses.is_empty() || statuses.contains(&b.status));
        Ok(bookings)
    }

    async fn list_bookings(&self, statuses: &[BookingStatus]) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_bookings(statuses).await
    }

    async fn list_overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_overdue_bookings(now).await
    }

    async fn booking_seat_ids(&self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        self.inner.booking_seat_ids(booking_id).await
    }

    async fn find_transaction(&self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction(booking_id).await
    }

    async fn list_refunds(&self, booking_id: i64) -> Result<Vec<Refund>, StoreError> {
        self.inner.list_refunds(booking_id).await
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.inner.find_user(user_id).await
    }
}

struct FaultyUnit {
    inner: Box<dyn UnitOfWork>,
    faults: Arc<Mutex<Faults>>,
    ops: Arc<Mutex<Vec<String>>>,
}

impl FaultyUnit {
    fn record(&self, op: String) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl UnitOfWork for FaultyUnit {
    async fn lock_event_status(&mut self, event_id: i64) -> Result<Option<EventStatus>, StoreError> {
        self.inner.lock_event_status(event_id).await
    }

    async fn claim_seat(&mut self, event_id: i64, seat_id: i64) -> Result<Option<Decimal>, StoreError> {
        self.inner.claim_seat(event_id, seat_id).await
    }

    async fn release_seat(&mut self, seat_id: i64) -> Result<(), StoreError> {
        self.record(format!("release seat {}", seat_id));
        if self.faults.lock().failing_seat_releases.contains(&seat_id) {
            return Err(injected());
        }
        self.inner.release_seat(seat_id).await
    }

    async fn booking_seat_ids(&mut self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        self.inner.booking_seat_ids(booking_id).await
    }

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError> {
        self.inner.insert_booking(new).await
    }

    async fn insert_booking_item(&mut self, item: BookingItem) -> Result<(), StoreError> {
        self.inner.insert_booking_item(item).await
    }

    async fn transition_booking(
        &mut self,
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError> {
        self.record(format!("booking {} {}->{}", booking_id, from, to));
        self.inner.transition_booking(booking_id, from, to).await
    }

    async fn find_transaction(&mut self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction(booking_id).await
    }

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, StoreError> {
        self.inner.insert_transaction(new).await
    }

    async fn transition_transaction(
        &mut self,
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
        change: &TransactionChange,
    ) -> Result<bool, StoreError> {
        self.record(format!("transaction {} {}->{}", transaction_id, from, to));
        if to == TransactionStatus::Completed && self.faults.lock().fail_settlement {
            return Err(injected());
        }
        self.inner
            .transition_transaction(transaction_id, from, to, change)
            .await
    }

    async fn insert_refund(&mut self, new: &NewRefund) -> Result<Refund, StoreError> {
        self.inner.insert_refund(new).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.record("commit".to_string());
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.record("rollback".to_string());
        self.inner.rollback().await
    }
}
