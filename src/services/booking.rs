//! Reservation transactor and booking queries.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{
    Booking, BookingItem, BookingStatus, BookingWithPayment, EventStatus, NewBooking,
    NewTransaction,
};
use crate::store::{Store, UnitOfWork};
use crate::worker::{Job, JobQueue};

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    jobs: JobQueue,
    hold: Duration,
}

impl BookingService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, jobs: JobQueue, hold: Duration) -> Self {
        Self {
            store,
            clock,
            jobs,
            hold,
        }
    }

    /// Claims every requested seat and creates the booking with its PENDING
    /// transaction, all in one unit of work. Any unavailable seat aborts the whole
    /// booking with `SeatUnavailable` and leaves no seat claimed.
    pub async fn create_booking(
        &self,
        user_id: i64,
        event_id: i64,
        seat_ids: &[i64],
    ) -> AppResult<BookingWithPayment> {
        validate_seat_ids(seat_ids)?;
        // Fixed claim order keeps two overlapping requests from deadlocking on row locks.
        let mut seat_ids = seat_ids.to_vec();
        seat_ids.sort_unstable();

        // 1) Блокируем событие от смены статуса на время брони
        let mut unit = self.store.begin().await?;
        match unit.lock_event_status(event_id).await? {
            None => {
                unit.rollback().await?;
                return Err(AppError::EventNotFound);
            }
            Some(EventStatus::Available) => {}
            Some(status) => {
                unit.rollback().await?;
                info!(event_id, %status, "booking rejected, event not available");
                return Err(AppError::EventNotAvailable);
            }
        }

        // 2) Захватываем места: все или ни одного
        let Some(total_amount) = claim_all(&mut *unit, event_id, &seat_ids).await? else {
            unit.rollback().await?;
            info!(user_id, event_id, ?seat_ids, "seat contention, booking rejected");
            return Err(AppError::SeatUnavailable);
        };

        // 3) Бронь, её места и транзакция PENDING
        let now = self.clock.now();
        let booking = unit
            .insert_booking(&NewBooking {
                user_id,
                event_id,
                total_amount,
                expires_at: now + self.hold,
                created_at: now,
            })
            .await?;
        for &seat_id in &seat_ids {
            unit.insert_booking_item(BookingItem {
                booking_id: booking.id,
                seat_id,
            })
            .await?;
        }
        let transaction = unit
            .insert_transaction(&NewTransaction {
                booking_id: booking.id,
                amount: total_amount,
                payment_method: None,
                transaction_date: now,
            })
            .await?;
        // 4) Коммитим
        unit.commit().await?;

        info!(
            booking_id = booking.id,
            user_id,
            event_id,
            seats = seat_ids.len(),
            total = %total_amount,
            "booking created"
        );
        self.enqueue_confirmation(&booking).await;

        Ok(BookingWithPayment {
            booking,
            seat_ids,
            transaction: Some(transaction),
        })
    }

    /// The user's bookings, newest first.
    pub async fn list_user_bookings(&self, user_id: i64) -> AppResult<Vec<BookingWithPayment>> {
        let bookings = self.store.list_user_bookings(user_id).await?;
        let mut detailed = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let seat_ids = self.store.booking_seat_ids(booking.id).await?;
            let transaction = self.store.find_transaction(booking.id).await?;
            detailed.push(BookingWithPayment {
                booking,
                seat_ids,
                transaction,
            });
        }
        Ok(detailed)
    }

    /// Admin view of an event's bookings. An empty filter returns all statuses.
    pub async fn list_event_bookings(
        &self,
        event_id: i64,
        statuses: &[BookingStatus],
    ) -> AppResult<Vec<Booking>> {
        if self.store.find_event(event_id).await?.is_none() {
            return Err(AppError::EventNotFound);
        }
        Ok(self.store.list_event_bookings(event_id, statuses).await?)
    }

    /// Admin view across every event. Newest first unless `oldest_first`.
    pub async fn list_all_bookings(
        &self,
        statuses: &[BookingStatus],
        oldest_first: bool,
    ) -> AppResult<Vec<Booking>> {
        let mut bookings = self.store.list_bookings(statuses).await?;
        if oldest_first {
            bookings.reverse();
        }
        debug!(count = bookings.len(), oldest_first, "admin booking listing");
        Ok(bookings)
    }

    async fn enqueue_confirmation(&self, booking: &Booking) {
        let user = match self.store.find_user(booking.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(booking_id = booking.id, user_id = booking.user_id, "no user record, confirmation not sent");
                return;
            }
            Err(e) => {
                warn!(booking_id = booking.id, error = %e, "could not load user for confirmation");
                return;
            }
        };

        let job = Job::Notify {
            booking_id: booking.id,
            email: user.email,
            message: format!(
                "Booking #{} created. Please complete payment within {} minutes.",
                booking.id,
                self.hold.num_minutes()
            ),
        };
        if let Err(e) = self.jobs.submit(job).await {
            warn!(booking_id = booking.id, error = %e, "confirmation not queued");
        }
    }
}

fn validate_seat_ids(seat_ids: &[i64]) -> AppResult<()> {
    if seat_ids.is_empty() {
        return Err(AppError::Validation("at least one seat is required".to_string()));
    }
    let mut seen = HashSet::with_capacity(seat_ids.len());
    if let Some(dup) = seat_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(AppError::Validation(format!("seat {} requested twice", dup)));
    }
    Ok(())
}

/// Claims the seats in order and returns their summed price, or `None` at the
/// first seat that is taken or belongs to another event.
async fn claim_all(
    unit: &mut dyn UnitOfWork,
    event_id: i64,
    seat_ids: &[i64],
) -> AppResult<Option<Decimal>> {
    let mut total = Decimal::ZERO;
    for &seat_id in seat_ids {
        match unit.claim_seat(event_id, seat_id).await? {
            Some(price) => total += price,
            None => return Ok(None),
        }
    }
    Ok(Some(total))
}
