//! In-process store used by the test suite and for running without Postgres.
//!
//! Seat claims and status transitions are applied to the shared tables as they
//! happen and recorded in an undo log; inserts are staged and published on commit.
//! A unit dropped without commit replays its undo log. Holding the event share
//! lock blocks `transition_event` on that event until the unit finishes, which is
//! what `SELECT ... FOR SHARE` gives the Postgres store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{ensure_transition, Store, StoreError, UnitOfWork};
use crate::models::{
    event, Booking, BookingItem, BookingStatus, Event, EventStatus, EventUpdate, NewBooking,
    NewEvent, NewRefund, NewTransaction, Refund, Seat, Transaction, TransactionChange,
    TransactionStatus, User,
};

const SHARE_LOCK_POLL: Duration = Duration::from_millis(2);

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    events: BTreeMap<i64, Event>,
    seats: BTreeMap<i64, Seat>,
    bookings: BTreeMap<i64, Booking>,
    items: Vec<BookingItem>,
    transactions: BTreeMap<i64, Transaction>,
    refunds: BTreeMap<i64, Refund>,
    event_shares: HashMap<i64, usize>,
}

impl Tables {
    fn add_seats(&mut self, seq: &Sequences, event_id: i64, numbers: std::ops::RangeInclusive<i32>, category: &str, price: Decimal) {
        for n in numbers {
            let id = seq.seat.fetch_add(1, Ordering::Relaxed);
            self.seats.insert(
                id,
                Seat {
                    id,
                    event_id,
                    seat_number: event::seat_number(event_id, n),
                    category: category.to_string(),
                    price,
                    is_booked: false,
                },
            );
        }
    }

    fn seat_ids_of(&self, booking_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .items
            .iter()
            .filter(|item| item.booking_id == booking_id)
            .map(|item| item.seat_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

struct Sequences {
    user: AtomicI64,
    event: AtomicI64,
    seat: AtomicI64,
    booking: AtomicI64,
    transaction: AtomicI64,
    refund: AtomicI64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            user: AtomicI64::new(1),
            event: AtomicI64::new(1),
            seat: AtomicI64::new(1),
            booking: AtomicI64::new(1),
            transaction: AtomicI64::new(1),
            refund: AtomicI64::new(1),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    seq: Arc<Sequences>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, name: &str, email: &str, role: &str) -> User {
        let id = self.seq.user.fetch_add(1, Ordering::Relaxed);
        let user = User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        };
        self.tables.lock().users.insert(id, user.clone());
        user
    }

    /// Seats currently marked booked for `event_id`.
    pub fn booked_seat_count(&self, event_id: i64) -> usize {
        self.tables
            .lock()
            .seats
            .values()
            .filter(|seat| seat.event_id == event_id && seat.is_booked)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnit {
            tables: Arc::clone(&self.tables),
            seq: Arc::clone(&self.seq),
            undo: Vec::new(),
            staged: Staged::default(),
            shared_events: Vec::new(),
            finished: false,
        }))
    }

    async fn create_event(&self, new: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError> {
        let id = self.seq.event.fetch_add(1, Ordering::Relaxed);
        let created = Event {
            id,
            name: new.name.clone(),
            location: new.location.clone(),
            date: new.date,
            capacity: new.capacity,
            status: EventStatus::Available,
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.lock();
        tables.events.insert(id, created.clone());
        tables.add_seats(&self.seq, id, 1..=new.capacity, &new.category, new.price);
        Ok(created)
    }

    async fn update_event(
        &self,
        event_id: i64,
        update: &EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        let mut tables = self.tables.lock();
        let Some(current) = tables.events.get_mut(&event_id) else {
            return Ok(None);
        };
        if current.status != EventStatus::Available || current.capacity > update.capacity {
            return Ok(None);
        }

        let previous = current.capacity;
        current.name = update.name.clone();
        current.location = update.location.clone();
        current.date = update.date;
        current.capacity = update.capacity;
        current.updated_at = now;
        let updated = current.clone();

        if update.capacity > previous {
            let (category, price) = tables
                .seats
                .values()
                .rev()
                .find(|seat| seat.event_id == event_id)
                .map(|seat| (seat.category.clone(), seat.price))
                .unwrap_or_else(|| ("REGULAR".to_string(), Decimal::ZERO));
            tables.add_seats(&self.seq, event_id, previous + 1..=update.capacity, &category, price);
        }
        Ok(Some(updated))
    }

    async fn transition_event(
        &self,
        event_id: i64,
        from: EventStatus,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        loop {
            {
                let mut tables = self.tables.lock();
                if tables.event_shares.get(&event_id).copied().unwrap_or(0) == 0 {
                    return Ok(match tables.events.get_mut(&event_id) {
                        Some(event) if event.status == from => {
                            event.status = to;
                            event.updated_at = now;
                            true
                        }
                        _ => false,
                    });
                }
            }
            tokio::time::sleep(SHARE_LOCK_POLL).await;
        }
    }

    async fn find_event(&self, event_id: i64) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.lock().events.get(&event_id).cloned())
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self.tables.lock().events.values().cloned().collect();
        events.sort_by_key(|event| (event.date, event.id));
        Ok(events)
    }

    async fn list_seats(&self, event_id: i64) -> Result<Vec<Seat>, StoreError> {
        Ok(self
            .tables
            .lock()
            .seats
            .values()
            .filter(|seat| seat.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, StoreError> {
        Ok(self.tables.lock().seats.get(&seat_id).cloned())
    }

    async fn find_booking(&self, booking_id: i64) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.lock().bookings.get(&booking_id).cloned())
    }

    async fn list_user_bookings(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .tables
            .lock()
            .bookings
            .values()
            .filter(|booking| booking.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(bookings)
    }

    async fn list_event_bookings(
        &self,
        event_id: i64,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .tables
            .lock()
            .bookings
            .values()
            .filter(|b| b.event_id == event_id)
            .filter(|b| statuses.is_empty() || statuses.contains(&b.status))
            .cloned()
            .collect())
    }

    async fn list_bookings(&self, statuses: &[BookingStatus]) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .tables
            .lock()
            .bookings
            .values()
            .filter(|b| statuses.is_empty() || statuses.contains(&b.status))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(bookings)
    }

    async fn list_overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let mut overdue: Vec<Booking> = self
            .tables
            .lock()
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.is_expired_at(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|b| b.expires_at);
        Ok(overdue)
    }

    async fn booking_seat_ids(&self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self.tables.lock().seat_ids_of(booking_id))
    }

    async fn find_transaction(&self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .tables
            .lock()
            .transactions
            .values()
            .find(|tx| tx.booking_id == booking_id)
            .cloned())
    }

    async fn list_refunds(&self, booking_id: i64) -> Result<Vec<Refund>, StoreError> {
        Ok(self
            .tables
            .lock()
            .refunds
            .values()
            .filter(|refund| refund.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().users.get(&user_id).cloned())
    }
}

enum Undo {
    Seat { seat_id: i64, was_booked: bool },
    BookingStatus { booking_id: i64, status: BookingStatus },
    Transaction(Transaction),
}

#[derive(Default)]
struct Staged {
    bookings: Vec<Booking>,
    items: Vec<BookingItem>,
    transactions: Vec<Transaction>,
    refunds: Vec<Refund>,
}

pub struct MemoryUnit {
    tables: Arc<Mutex<Tables>>,
    seq: Arc<Sequences>,
    undo: Vec<Undo>,
    staged: Staged,
    shared_events: Vec<i64>,
    finished: bool,
}

impl MemoryUnit {
    fn finish(&mut self, tables: &mut Tables, keep: bool) {
        if !keep {
            while let Some(entry) = self.undo.pop() {
                match entry {
                    Undo::Seat { seat_id, was_booked } => {
                        if let Some(seat) = tables.seats.get_mut(&seat_id) {
                            seat.is_booked = was_booked;
                        }
                    }
                    Undo::BookingStatus { booking_id, status } => {
                        if let Some(booking) = tables.bookings.get_mut(&booking_id) {
                            booking.status = status;
                        }
                    }
                    Undo::Transaction(previous) => {
                        tables.transactions.insert(previous.id, previous);
                    }
                }
            }
        }
        for event_id in self.shared_events.drain(..) {
            if let Some(count) = tables.event_shares.get_mut(&event_id) {
                *count = count.saturating_sub(1);
            }
        }
        self.undo.clear();
        self.finished = true;
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.finished {
            let tables = Arc::clone(&self.tables);
            let mut guard = tables.lock();
            self.finish(&mut guard, false);
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_event_status(&mut self, event_id: i64) -> Result<Option<EventStatus>, StoreError> {
        let mut tables = self.tables.lock();
        let Some(status) = tables.events.get(&event_id).map(|event| event.status) else {
            return Ok(None);
        };
        if !self.shared_events.contains(&event_id) {
            *tables.event_shares.entry(event_id).or_default() += 1;
            self.shared_events.push(event_id);
        }
        Ok(Some(status))
    }

    async fn claim_seat(&mut self, event_id: i64, seat_id: i64) -> Result<Option<Decimal>, StoreError> {
        let mut tables = self.tables.lock();
        match tables.seats.get_mut(&seat_id) {
            Some(seat) if seat.event_id == event_id && !seat.is_booked => {
                seat.is_booked = true;
                self.undo.push(Undo::Seat {
                    seat_id,
                    was_booked: false,
                });
                Ok(Some(seat.price))
            }
            _ => Ok(None),
        }
    }

    async fn release_seat(&mut self, seat_id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(seat) = tables.seats.get_mut(&seat_id) {
            if seat.is_booked {
                seat.is_booked = false;
                self.undo.push(Undo::Seat {
                    seat_id,
                    was_booked: true,
                });
            }
        }
        Ok(())
    }

    async fn booking_seat_ids(&mut self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        let mut ids = self.tables.lock().seat_ids_of(booking_id);
        ids.extend(
            self.staged
                .items
                .iter()
                .filter(|item| item.booking_id == booking_id)
                .map(|item| item.seat_id),
        );
        ids.sort_unstable();
        Ok(ids)
    }

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError> {
        let booking = Booking {
            id: self.seq.booking.fetch_add(1, Ordering::Relaxed),
            user_id: new.user_id,
            event_id: new.event_id,
            status: BookingStatus::Pending,
            total_amount: new.total_amount,
            expires_at: new.expires_at,
            created_at: new.created_at,
        };
        self.staged.bookings.push(booking.clone());
        Ok(booking)
    }

    async fn insert_booking_item(&mut self, item: BookingItem) -> Result<(), StoreError> {
        self.staged.items.push(item);
        Ok(())
    }

    async fn transition_booking(
        &mut self,
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        if let Some(staged) = self.staged.bookings.iter_mut().find(|b| b.id == booking_id) {
            if staged.status != from {
                return Ok(false);
            }
            staged.status = to;
            return Ok(true);
        }

        let mut tables = self.tables.lock();
        match tables.bookings.get_mut(&booking_id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                self.undo.push(Undo::BookingStatus {
                    booking_id,
                    status: from,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_transaction(&mut self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        if let Some(staged) = self.staged.transactions.iter().find(|tx| tx.booking_id == booking_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self
            .tables
            .lock()
            .transactions
            .values()
            .find(|tx| tx.booking_id == booking_id)
            .cloned())
    }

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, StoreError> {
        let exists = self.staged.transactions.iter().any(|tx| tx.booking_id == new.booking_id)
            || self
                .tables
                .lock()
                .transactions
                .values()
                .any(|tx| tx.booking_id == new.booking_id);
        if exists {
            return Err(StoreError::Duplicate("transaction"));
        }

        let transaction = Transaction {
            id: self.seq.transaction.fetch_add(1, Ordering::Relaxed),
            booking_id: new.booking_id,
            amount: new.amount,
            payment_method: new.payment_method,
            external_id: None,
            status: TransactionStatus::Pending,
            transaction_date: new.transaction_date,
        };
        self.staged.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn transition_transaction(
        &mut self,
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
        change: &TransactionChange,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;

        fn apply(tx: &mut Transaction, to: TransactionStatus, change: &TransactionChange) {
            tx.status = to;
            if let Some(method) = change.payment_method {
                tx.payment_method = Some(method);
            }
            if let Some(external_id) = &change.external_id {
                tx.external_id = Some(external_id.clone());
            }
            if let Some(date) = change.transaction_date {
                tx.transaction_date = date;
            }
        }

        if let Some(staged) = self.staged.transactions.iter_mut().find(|tx| tx.id == transaction_id) {
            if staged.status != from {
                return Ok(false);
            }
            apply(staged, to, change);
            return Ok(true);
        }

        let mut tables = self.tables.lock();
        match tables.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.status == from => {
                self.undo.push(Undo::Transaction(tx.clone()));
                apply(tx, to, change);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_refund(&mut self, new: &NewRefund) -> Result<Refund, StoreError> {
        let refund = Refund {
            id: self.seq.refund.fetch_add(1, Ordering::Relaxed),
            booking_id: new.booking_id,
            amount: new.amount,
            reason: new.reason.clone(),
            status: new.status,
            refund_date: new.refund_date,
        };
        self.staged.refunds.push(refund.clone());
        Ok(refund)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tables = Arc::clone(&self.tables);
        let mut tables = tables.lock();

        let duplicate = self.staged.transactions.iter().any(|staged| {
            tables
                .transactions
                .values()
                .any(|tx| tx.booking_id == staged.booking_id)
        });
        if duplicate {
            self.finish(&mut tables, false);
            return Err(StoreError::Duplicate("transaction"));
        }

        let staged = std::mem::take(&mut self.staged);
        for booking in staged.bookings {
            tables.bookings.insert(booking.id, booking);
        }
        tables.items.extend(staged.items);
        for tx in staged.transactions {
            tables.transactions.insert(tx.id, tx);
        }
        for refund in staged.refunds {
            tables.refunds.insert(refund.id, refund);
        }
        self.finish(&mut tables, true);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let tables = Arc::clone(&self.tables);
        let mut tables = tables.lock();
        self.finish(&mut tables, false);
        Ok(())
    }
}
