//! Asynchronous half of event cancellation: the refund batch.
//!
//! Each booking is settled in its own unit of work. A failure on one booking is
//! counted and logged; the rest of the batch still runs.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::models::{
    Booking, BookingStatus, NewRefund, RefundStatus, TransactionChange, TransactionStatus,
    EVENT_CANCELLED_REASON,
};
use crate::services::notifier::Notifier;
use crate::store::{Store, StoreError, UnitOfWork};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancellationReport {
    pub refunded: usize,
    pub cancelled: usize,
    /// Bookings whose user could not be resolved, or that left PENDING/PAID on their own.
    pub skipped: usize,
    pub failed: usize,
}

enum Disposition {
    Refunded(Decimal),
    Cancelled,
    /// The booking changed status under us; re-read and try again.
    Moved,
}

#[derive(Clone)]
pub struct CancellationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    refund_delay: Duration,
}

impl CancellationService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        refund_delay: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            refund_delay,
        }
    }

    pub async fn process_event(&self, event_id: i64) -> Result<CancellationReport, StoreError> {
        info!(event_id, "processing refunds for cancelled event");
        let bookings = self
            .store
            .list_event_bookings(event_id, &[BookingStatus::Paid, BookingStatus::Pending])
            .await?;

        let mut report = CancellationReport::default();
        for booking in bookings {
            let user = match self.store.find_user(booking.user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    warn!(booking_id = booking.id, user_id = booking.user_id, "user not found, skipping booking");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(booking_id = booking.id, error = %e, "failed to load booking user");
                    report.failed += 1;
                    continue;
                }
            };

            let booking_id = booking.id;
            match self.settle_booking(booking).await {
                Ok(Some(Disposition::Refunded(amount))) => {
                    report.refunded += 1;
                    let message = format!(
                        "Event cancelled. Your payment of {} for booking #{} has been refunded in full.",
                        amount, booking_id
                    );
                    self.notify(&user.email, booking_id, &message).await;
                }
                Ok(Some(Disposition::Cancelled)) => {
                    report.cancelled += 1;
                    let message = format!("Booking #{} was cancelled because the event was cancelled.", booking_id);
                    self.notify(&user.email, booking_id, &message).await;
                }
                Ok(Some(Disposition::Moved)) | Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(event_id, booking_id, error = %e, "refund step failed for booking");
                    report.failed += 1;
                }
            }
        }

        info!(
            event_id,
            refunded = report.refunded,
            cancelled = report.cancelled,
            skipped = report.skipped,
            failed = report.failed,
            "refund batch finished"
        );
        Ok(report)
    }

    /// Refunds or cancels one booking, following it if a concurrent payment moves
    /// it from PENDING to PAID. `None` when it ended outside PENDING/PAID.
    async fn settle_booking(&self, mut booking: Booking) -> Result<Option<Disposition>, StoreError> {
        for _ in 0..MAX_ATTEMPTS {
            let outcome = match booking.status {
                BookingStatus::Paid => self.refund_booking(&booking).await?,
                BookingStatus::Pending => self.cancel_booking(&booking).await?,
                _ => return Ok(None),
            };
            if !matches!(outcome, Disposition::Moved) {
                return Ok(Some(outcome));
            }
            match self.store.find_booking(booking.id).await? {
                Some(current) => booking = current,
                None => return Ok(None),
            }
        }
        Ok(Some(Disposition::Moved))
    }

    async fn refund_booking(&self, booking: &Booking) -> Result<Disposition, StoreError> {
        info!(booking_id = booking.id, "refunding booking");
        // Simulated bank round-trip.
        tokio::time::sleep(self.refund_delay).await;

        // 1) PAID -> REFUNDED, иначе бронь успела сменить статус
        let mut unit = self.store.begin().await?;
        if !unit
            .transition_booking(booking.id, BookingStatus::Paid, BookingStatus::Refunded)
            .await?
        {
            unit.rollback().await?;
            return Ok(Disposition::Moved);
        }

        // 2) Транзакция COMPLETED -> REFUNDED, сумма берется из неё
        let amount = match unit.find_transaction(booking.id).await? {
            Some(tx) => {
                if tx.status == TransactionStatus::Completed {
                    unit.transition_transaction(
                        tx.id,
                        TransactionStatus::Completed,
                        TransactionStatus::Refunded,
                        &TransactionChange::default(),
                    )
                    .await?;
                }
                tx.amount
            }
            None => booking.total_amount,
        };

        // 3) Запись о возврате и освобождение мест
        unit.insert_refund(&NewRefund {
            booking_id: booking.id,
            amount,
            reason: EVENT_CANCELLED_REASON.to_string(),
            status: RefundStatus::Completed,
            refund_date: self.clock.now(),
        })
        .await?;
        release_seats(&mut *unit, booking.id).await?;
        unit.commit().await?;

        info!(booking_id = booking.id, %amount, "booking refunded");
        Ok(Disposition::Refunded(amount))
    }

    async fn cancel_booking(&self, booking: &Booking) -> Result<Disposition, StoreError> {
        let mut unit = self.store.begin().await?;
        if !unit
            .transition_booking(booking.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await?
        {
            unit.rollback().await?;
            return Ok(Disposition::Moved);
        }

        if let Some(tx) = unit.find_transaction(booking.id).await? {
            if tx.status == TransactionStatus::Pending {
                unit.transition_transaction(
                    tx.id,
                    TransactionStatus::Pending,
                    TransactionStatus::Cancelled,
                    &TransactionChange::default(),
                )
                .await?;
            }
        }
        release_seats(&mut *unit, booking.id).await?;
        unit.commit().await?;

        info!(booking_id = booking.id, "booking cancelled");
        Ok(Disposition::Cancelled)
    }

    async fn notify(&self, email: &str, booking_id: i64, message: &str) {
        if let Err(e) = self.notifier.deliver(email, booking_id, message).await {
            warn!(booking_id, error = %e, "notification failed");
        }
    }
}

/// Releases every seat the booking holds. Only call after the booking's own
/// status transition succeeded in the same unit.
pub(crate) async fn release_seats(unit: &mut dyn UnitOfWork, booking_id: i64) -> Result<usize, StoreError> {
    let seat_ids = unit.booking_seat_ids(booking_id).await?;
    for seat_id in &seat_ids {
        unit.release_seat(*seat_id).await?;
    }
    Ok(seat_ids.len())
}
