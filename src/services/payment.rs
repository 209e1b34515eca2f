//! Payment state machine.
//!
//! `process_payment` checks, in order: method, existence, ownership, status,
//! expiry, existing transaction. Only then is the gateway settlement simulated
//! and the transaction and booking advanced together in one unit of work.
//!
//! Expiry is enforced lazily here; the periodic sweep in [`PaymentService::sweep_expired`]
//! only reclaims seats of bookings nobody comes back to.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{
    Booking, BookingStatus, BookingWithPayment, NewTransaction, PaymentMethod, Transaction,
    TransactionChange, TransactionStatus,
};
use crate::services::cancellation::release_seats;
use crate::store::{Store, StoreError};

/// Result of writing a settlement to the store.
enum Recording {
    Recorded,
    /// Another attempt completed the transaction first.
    AlreadyCompleted,
    /// The transaction was cancelled (event cancellation) while we settled.
    TransactionClosed,
    /// The booking left PENDING while we settled.
    BookingMoved,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settlement_delay: Duration,
}

impl PaymentService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settlement_delay: Duration) -> Self {
        Self {
            store,
            clock,
            settlement_delay,
        }
    }

    pub async fn process_payment(&self, booking_id: i64, user_id: i64, method: &str) -> AppResult<Transaction> {
        let method: PaymentMethod = method
            .parse()
            .map_err(|_| AppError::InvalidPaymentMethod(method.to_string()))?;

        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::NotFound("booking"))?;

        if booking.user_id != user_id {
            warn!(booking_id, user_id, "payment attempt on another user's booking");
            return Err(AppError::Unauthorized);
        }
        ensure_pending(booking.status)?;

        let now = self.clock.now();
        if booking.is_expired_at(now) {
            if self.expire_booking(booking_id).await? {
                return Err(AppError::BookingExpired);
            }
            // Lost the race to another writer; report whatever it left behind.
            let current = self
                .store
                .find_booking(booking_id)
                .await?
                .ok_or(AppError::NotFound("booking"))?;
            ensure_pending(current.status)?;
            return Err(AppError::BookingExpired);
        }

        // Транзакция PENDING создается, если её ещё нет
        let transaction = self.pending_transaction(&booking).await?;

        // Simulated gateway settlement.
        tokio::time::sleep(self.settlement_delay).await;
        let external_id = external_reference(method, booking_id);
        let settled_at = self.clock.now();
        let change = TransactionChange {
            payment_method: Some(method),
            external_id: Some(external_id.clone()),
            transaction_date: Some(settled_at),
        };

        match self.record_settlement(&transaction, booking_id, &change).await {
            Ok(Recording::Recorded) => {
                info!(booking_id, %external_id, method = method.display_name(), "payment completed");
                Ok(Transaction {
                    payment_method: Some(method),
                    external_id: Some(external_id),
                    status: TransactionStatus::Completed,
                    transaction_date: settled_at,
                    ..transaction
                })
            }
            Ok(Recording::AlreadyCompleted) => Err(AppError::PaymentAlreadyMade),
            Ok(Recording::TransactionClosed) => Err(AppError::BookingNotPending),
            Ok(Recording::BookingMoved) => {
                error!(booking_id, %external_id, "settled payment for a booking that left PENDING");
                Err(AppError::ReconciliationRequired { booking_id, external_id })
            }
            Err(e) => {
                error!(booking_id, %external_id, error = %e, "settled payment could not be recorded");
                Err(AppError::ReconciliationRequired { booking_id, external_id })
            }
        }
    }

    /// Ownership-checked snapshot of a booking and its payment record.
    pub async fn payment_status(&self, booking_id: i64, user_id: i64) -> AppResult<BookingWithPayment> {
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::NotFound("booking"))?;
        if booking.user_id != user_id {
            return Err(AppError::Unauthorized);
        }

        let seat_ids = self.store.booking_seat_ids(booking_id).await?;
        let transaction = self.store.find_transaction(booking_id).await?;
        debug!(booking_id, status = %booking.status, "payment status read");
        Ok(BookingWithPayment {
            booking,
            seat_ids,
            transaction,
        })
    }

    /// PENDING -> EXPIRED, releasing the booking's seats and cancelling its open
    /// transaction. Returns false if the booking was no longer PENDING.
    pub async fn expire_booking(&self, booking_id: i64) -> Result<bool, StoreError> {
        let mut unit = self.store.begin().await?;
        if !unit
            .transition_booking(booking_id, BookingStatus::Pending, BookingStatus::Expired)
            .await?
        {
            unit.rollback().await?;
            return Ok(false);
        }

        if let Some(tx) = unit.find_transaction(booking_id).await? {
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
        let released = release_seats(&mut *unit, booking_id).await?;
        unit.commit().await?;

        info!(booking_id, released, "booking expired");
        Ok(true)
    }

    /// Expires every PENDING booking whose window has closed. Returns how many moved.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let overdue = self.store.list_overdue_bookings(self.clock.now()).await?;
        let mut expired = 0;
        for booking in overdue {
            match self.expire_booking(booking.id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!(booking_id = booking.id, error = %e, "failed to expire booking"),
            }
        }
        if expired > 0 {
            info!(expired, "expiry sweep released overdue bookings");
        }
        Ok(expired)
    }

    /// The booking's transaction, created PENDING when missing. Fails with
    /// `PaymentAlreadyMade` if it is already COMPLETED.
    async fn pending_transaction(&self, booking: &Booking) -> AppResult<Transaction> {
        if let Some(tx) = self.store.find_transaction(booking.id).await? {
            return match tx.status {
                TransactionStatus::Pending => Ok(tx),
                TransactionStatus::Completed | TransactionStatus::Refunded => Err(AppError::PaymentAlreadyMade),
                TransactionStatus::Cancelled => Err(AppError::BookingNotPending),
            };
        }

        let mut unit = self.store.begin().await?;
        let created = unit
            .insert_transaction(&NewTransaction {
                booking_id: booking.id,
                amount: booking.total_amount,
                payment_method: None,
                transaction_date: self.clock.now(),
            })
            .await;
        let created = match created {
            Ok(tx) => tx,
            Err(StoreError::Duplicate(_)) => {
                unit.rollback().await?;
                return self.existing_pending(booking.id).await;
            }
            Err(e) => return Err(e.into()),
        };
        match unit.commit().await {
            Ok(()) => {
                debug!(booking_id = booking.id, "created missing transaction");
                Ok(created)
            }
            Err(StoreError::Duplicate(_)) => self.existing_pending(booking.id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_pending(&self, booking_id: i64) -> AppResult<Transaction> {
        match self.store.find_transaction(booking_id).await? {
            Some(tx) if tx.status == TransactionStatus::Pending => Ok(tx),
            Some(tx) if tx.status == TransactionStatus::Cancelled => Err(AppError::BookingNotPending),
            Some(_) => Err(AppError::PaymentAlreadyMade),
            None => Err(AppError::NotFound("transaction")),
        }
    }

    /// Writes a settlement in one unit of work. The booking row is moved first and
    /// the transaction second, the same lock order as expiry and the refund batch.
    async fn record_settlement(
        &self,
        transaction: &Transaction,
        booking_id: i64,
        change: &TransactionChange,
    ) -> Result<Recording, StoreError> {
        let mut unit = self.store.begin().await?;

        // Сначала бронь: строка блокируется в том же порядке, что и при отмене и истечении
        if !unit
            .transition_booking(booking_id, BookingStatus::Pending, BookingStatus::Paid)
            .await?
        {
            unit.rollback().await?;
            return self.settlement_conflict(booking_id).await;
        }

        // Затем транзакция
        if !unit
            .transition_transaction(
                transaction.id,
                TransactionStatus::Pending,
                TransactionStatus::Completed,
                change,
            )
            .await?
        {
            let current = unit.find_transaction(booking_id).await?;
            unit.rollback().await?;
            return Ok(match current.map(|tx| tx.status) {
                Some(TransactionStatus::Completed) | Some(TransactionStatus::Refunded) => {
                    Recording::AlreadyCompleted
                }
                _ => Recording::TransactionClosed,
            });
        }

        unit.commit().await?;
        Ok(Recording::Recorded)
    }

    /// Explains why the booking was no longer PENDING when the settlement landed.
    async fn settlement_conflict(&self, booking_id: i64) -> Result<Recording, StoreError> {
        let status = self.store.find_booking(booking_id).await?.map(|b| b.status);
        if matches!(status, Some(BookingStatus::Paid) | Some(BookingStatus::Refunded)) {
            return Ok(Recording::AlreadyCompleted);
        }
        // Бронь отменена вместе с транзакцией: деньги не списаны
        let tx_status = self.store.find_transaction(booking_id).await?.map(|tx| tx.status);
        Ok(match tx_status {
            Some(TransactionStatus::Cancelled) => Recording::TransactionClosed,
            _ => Recording::BookingMoved,
        })
    }
}

fn ensure_pending(status: BookingStatus) -> AppResult<()> {
    match status {
        BookingStatus::Pending => Ok(()),
        BookingStatus::Paid => Err(AppError::PaymentAlreadyMade),
        _ => Err(AppError::BookingNotPending),
    }
}

/// `PAY-{code}-{booking_id}-{unique}`.
fn external_reference(method: PaymentMethod, booking_id: i64) -> String {
    format!("PAY-{}-{}-{}", method.code(), booking_id, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_reference_embeds_method_code_and_booking() {
        let reference = external_reference(PaymentMethod::BankTransfer, 42);
        assert!(reference.starts_with("PAY-BT-42-"));
        assert_ne!(reference, external_reference(PaymentMethod::BankTransfer, 42));
    }

    #[test]
    fn paid_bookings_report_already_made() {
        assert!(matches!(ensure_pending(BookingStatus::Paid), Err(AppError::PaymentAlreadyMade)));
        assert!(matches!(ensure_pending(BookingStatus::Expired), Err(AppError::BookingNotPending)));
        assert!(ensure_pending(BookingStatus::Pending).is_ok());
    }
}
