use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres};
use tracing::debug;

use super::{ensure_transition, Store, StoreError, UnitOfWork};
use crate::models::{
    Booking, BookingItem, BookingStatus, Event, EventStatus, EventUpdate, NewBooking, NewEvent,
    NewRefund, NewTransaction, Refund, Seat, Transaction, TransactionChange, TransactionStatus,
    User,
};

const EVENT_COLUMNS: &str = "id, name, location, date, capacity, status, created_at, updated_at";
const BOOKING_COLUMNS: &str = "id, user_id, event_id, status, total_amount, expires_at, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, booking_id, amount, payment_method, external_id, status, transaction_date";

// Statuses are TEXT columns; rows are decoded here and parsed into the closed enums.

#[derive(FromRow)]
struct EventRow {
    id: i64,
    name: String,
    location: String,
    date: DateTime<Utc>,
    capacity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            name: row.name,
            location: row.location,
            date: row.date,
            capacity: row.capacity,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    event_id: i64,
    status: String,
    total_amount: Decimal,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            status: row.status.parse()?,
            total_amount: row.total_amount,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    booking_id: i64,
    amount: Decimal,
    payment_method: Option<String>,
    external_id: Option<String>,
    status: String,
    transaction_date: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            booking_id: row.booking_id,
            amount: row.amount,
            payment_method: row.payment_method.as_deref().map(str::parse).transpose()?,
            external_id: row.external_id,
            status: row.status.parse()?,
            transaction_date: row.transaction_date,
        })
    }
}

#[derive(FromRow)]
struct RefundRow {
    id: i64,
    booking_id: i64,
    amount: Decimal,
    reason: String,
    status: String,
    refund_date: DateTime<Utc>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = StoreError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Refund {
            id: row.id,
            booking_id: row.booking_id,
            amount: row.amount,
            reason: row.reason,
            status: row.status.parse()?,
            refund_date: row.refund_date,
        })
    }
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn status_names(statuses: &[BookingStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// A unique-key violation becomes `Duplicate(what)`; every other error passes through.
fn unique_violation(err: sqlx::Error, what: &'static str) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        other => StoreError::Database(other),
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }

    async fn create_event(&self, new: &NewEvent, now: DateTime<Utc>) -> Result<Event, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO events (name, location, date, capacity, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'AVAILABLE', $5, $5)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(&new.location)
        .bind(new.date)
        .bind(new.capacity)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO seats (event_id, seat_number, category, price, is_booked)
             SELECT $1, $1::text || '-' || n::text, $2, $3, FALSE
             FROM generate_series(1, $4) AS n",
        )
        .bind(row.id)
        .bind(&new.category)
        .bind(new.price)
        .bind(new.capacity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Event::try_from(row)
    }

    async fn update_event(
        &self,
        event_id: i64,
        update: &EventUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i32> = sqlx::query_scalar(
            "SELECT capacity FROM events
             WHERE id = $1 AND status = 'AVAILABLE' AND capacity <= $2
             FOR UPDATE",
        )
        .bind(event_id)
        .bind(update.capacity)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let row: EventRow = sqlx::query_as(&format!(
            "UPDATE events
             SET name = $2, location = $3, date = $4, capacity = $5, updated_at = $6
             WHERE id = $1
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event_id)
        .bind(&update.name)
        .bind(&update.location)
        .bind(update.date)
        .bind(update.capacity)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if update.capacity > previous {
            // New seats inherit category and price from the event's latest seat.
            sqlx::query(
                "INSERT INTO seats (event_id, seat_number, category, price, is_booked)
                 SELECT $1, $1::text || '-' || n::text,
                        COALESCE((SELECT category FROM seats WHERE event_id = $1 ORDER BY id DESC LIMIT 1), 'REGULAR'),
                        COALESCE((SELECT price FROM seats WHERE event_id = $1 ORDER BY id DESC LIMIT 1), 0),
                        FALSE
                 FROM generate_series($2, $3) AS n",
            )
            .bind(event_id)
            .bind(previous + 1)
            .bind(update.capacity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Event::try_from(row).map(Some)
    }

    async fn transition_event(
        &self,
        event_id: i64,
        from: EventStatus,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        let result = sqlx::query(
            "UPDATE events SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(event_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_event(&self, event_id: i64) -> Result<Option<Event>, StoreError> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let rows: Vec<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY date"))
                .fetch_all(&self.pool)
                .await?;
        decode_all(rows)
    }

    async fn list_seats(&self, event_id: i64) -> Result<Vec<Seat>, StoreError> {
        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, event_id, seat_number, category, price, is_booked
             FROM seats WHERE event_id = $1 ORDER BY id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, StoreError> {
        let seat = sqlx::query_as::<_, Seat>(
            "SELECT id, event_id, seat_number, category, price, is_booked FROM seats WHERE id = $1",
        )
        .bind(seat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(seat)
    }

    async fn find_booking(&self, booking_id: i64) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_user_bookings(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn list_event_bookings(
        &self,
        event_id: i64,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE event_id = $1 AND (cardinality($2::text[]) = 0 OR status = ANY($2))
             ORDER BY id"
        ))
        .bind(event_id)
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn list_bookings(&self, statuses: &[BookingStatus]) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE cardinality($1::text[]) = 0 OR status = ANY($1)
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn list_overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'PENDING' AND expires_at < $1
             ORDER BY expires_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn booking_seat_ids(&self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar(
            "SELECT seat_id FROM booking_items WHERE booking_id = $1 ORDER BY seat_id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_transaction(&self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn list_refunds(&self, booking_id: i64) -> Result<Vec<Refund>, StoreError> {
        let rows: Vec<RefundRow> = sqlx::query_as(
            "SELECT id, booking_id, amount, reason, status, refund_date
             FROM refunds WHERE booking_id = $1 ORDER BY id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT id, name, email, role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

/// A Postgres transaction. sqlx rolls back on drop if it was never committed.
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn lock_event_status(&mut self, event_id: i64) -> Result<Option<EventStatus>, StoreError> {
        // FOR SHARE conflicts with the status UPDATE of a concurrent cancellation.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM events WHERE id = $1 FOR SHARE")
                .bind(event_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(status.as_deref().map(str::parse).transpose()?)
    }

    async fn claim_seat(&mut self, event_id: i64, seat_id: i64) -> Result<Option<Decimal>, StoreError> {
        let price: Option<Decimal> = sqlx::query_scalar(
            "UPDATE seats SET is_booked = TRUE
             WHERE id = $1 AND event_id = $2 AND is_booked = FALSE
             RETURNING price",
        )
        .bind(seat_id)
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(price)
    }

    async fn release_seat(&mut self, seat_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE seats SET is_booked = FALSE WHERE id = $1")
            .bind(seat_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn booking_seat_ids(&mut self, booking_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar(
            "SELECT seat_id FROM booking_items WHERE booking_id = $1 ORDER BY seat_id",
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn insert_booking(&mut self, new: &NewBooking) -> Result<Booking, StoreError> {
        let row: BookingRow = sqlx::query_as(&format!(
            "INSERT INTO bookings (user_id, event_id, status, total_amount, expires_at, created_at)
             VALUES ($1, $2, 'PENDING', $3, $4, $5)
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(new.user_id)
        .bind(new.event_id)
        .bind(new.total_amount)
        .bind(new.expires_at)
        .bind(new.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Booking::try_from(row)
    }

    async fn insert_booking_item(&mut self, item: BookingItem) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO booking_items (booking_id, seat_id) VALUES ($1, $2)")
            .bind(item.booking_id)
            .bind(item.seat_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn transition_booking(
        &mut self,
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        let result = sqlx::query("UPDATE bookings SET status = $3 WHERE id = $1 AND status = $2")
            .bind(booking_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut *self.tx)
            .await?;
        debug!(booking_id, %from, %to, rows = result.rows_affected(), "booking transition");
        Ok(result.rows_affected() > 0)
    }

    async fn find_transaction(&mut self, booking_id: i64) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE booking_id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, StoreError> {
        let row: TransactionRow = sqlx::query_as(&format!(
            "INSERT INTO transactions (booking_id, amount, payment_method, status, transaction_date)
             VALUES ($1, $2, $3, 'PENDING', $4)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new.booking_id)
        .bind(new.amount)
        .bind(new.payment_method.map(|m| m.as_str()))
        .bind(new.transaction_date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| unique_violation(e, "transaction"))?;
        Transaction::try_from(row)
    }

    async fn transition_transaction(
        &mut self,
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
        change: &TransactionChange,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        let result = sqlx::query(
            "UPDATE transactions
             SET status = $3,
                 payment_method = COALESCE($4, payment_method),
                 external_id = COALESCE($5, external_id),
                 transaction_date = COALESCE($6, transaction_date)
             WHERE id = $1 AND status = $2",
        )
        .bind(transaction_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(change.payment_method.map(|m| m.as_str()))
        .bind(change.external_id.as_deref())
        .bind(change.transaction_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_refund(&mut self, new: &NewRefund) -> Result<Refund, StoreError> {
        let row: RefundRow = sqlx::query_as(
            "INSERT INTO refunds (booking_id, amount, reason, status, refund_date)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, booking_id, amount, reason, status, refund_date",
        )
        .bind(new.booking_id)
        .bind(new.amount)
        .bind(&new.reason)
        .bind(new.status.as_str())
        .bind(new.refund_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Refund::try_from(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        // Нарушение уникальности на COMMIT тоже означает дубликат
        self.tx
            .commit()
            .await
            .map_err(|e| unique_violation(e, "transaction"))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
