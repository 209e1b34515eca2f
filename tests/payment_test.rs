//! Payment state machine tests: check order, idempotency and lazy expiry.

mod common;

use chrono::Duration;
use rust_decimal_macros::dec;

use common::{seat_ids, Harness};
use seat_reservation::error::{AppError, ErrorKind};
use seat_reservation::models::{BookingStatus, PaymentMethod, TransactionStatus};
use seat_reservation::store::Store;

async fn pending_booking(h: &Harness, seats: usize) -> (i64, i64, Vec<i64>) {
    let user = h.user("payer");
    let (event, all_seats) = h.event(seats as i32, dec!(30.00)).await;
    let ids = seat_ids(&all_seats);
    let created = h
        .state
        .bookings
        .create_booking(user.id, event.id, &ids)
        .await
        .unwrap();
    (created.booking.id, user.id, ids)
}

#[tokio::test]
async fn payment_completes_transaction_and_booking() {
    let h = Harness::new();
    let (booking_id, user_id, _) = pending_booking(&h, 2).await;

    let tx = h
        .state
        .payments
        .process_payment(booking_id, user_id, "credit_card")
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.payment_method, Some(PaymentMethod::CreditCard));
    assert_eq!(tx.amount, dec!(60.00));
    let reference = tx.external_id.unwrap();
    assert!(reference.starts_with(&format!("PAY-CR-{}-", booking_id)));

    let booking = h.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Paid);
    let stored = h.store.find_transaction(booking_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.external_id.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn second_payment_is_rejected_and_nothing_changes() {
    let h = Harness::new();
    let (booking_id, user_id, _) = pending_booking(&h, 1).await;

    let first = h
        .state
        .payments
        .process_payment(booking_id, user_id, "e_wallet")
        .await
        .unwrap();
    let second = h
        .state
        .payments
        .process_payment(booking_id, user_id, "bank_transfer")
        .await
        .unwrap_err();
    assert!(matches!(second, AppError::PaymentAlreadyMade));
    assert_eq!(second.kind(), ErrorKind::StateConflict);

    let stored = h.store.find_transaction(booking_id).await.unwrap().unwrap();
    assert_eq!(stored.payment_method, Some(PaymentMethod::EWallet));
    assert_eq!(stored.external_id, first.external_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_payments_complete_exactly_once() {
    let h = Harness::new();
    let (booking_id, user_id, _) = pending_booking(&h, 1).await;

    let (a, b) = tokio::join!(
        h.state.payments.process_payment(booking_id, user_id, "credit_card"),
        h.state.payments.process_payment(booking_id, user_id, "credit_card"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::PaymentAlreadyMade)));
}

/// Booking made at T with a 15 minute window; paying at T+16min expires it.
#[tokio::test]
async fn payment_after_the_window_expires_the_booking() {
    let h = Harness::new();
    let (booking_id, user_id, seats) = pending_booking(&h, 2).await;

    h.clock.advance(Duration::minutes(16));
    let err = h
        .state
        .payments
        .process_payment(booking_id, user_id, "credit_card")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BookingExpired));

    let booking = h.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Expired);
    for seat in seats {
        assert!(!h.store.find_seat(seat).await.unwrap().unwrap().is_booked);
    }
    let tx = h.store.find_transaction(booking_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);

    let again = h
        .state
        .payments
        .process_payment(booking_id, user_id, "credit_card")
        .await
        .unwrap_err();
    assert!(matches!(again, AppError::BookingNotPending));
}

#[tokio::test]
async fn payment_exactly_at_the_deadline_is_accepted() {
    let h = Harness::new();
    let (booking_id, user_id, _) = pending_booking(&h, 1).await;

    h.clock.advance(Duration::minutes(15));
    assert!(h
        .state
        .payments
        .process_payment(booking_id, user_id, "bank_transfer")
        .await
        .is_ok());
}

#[tokio::test]
async fn expired_seats_can_be_booked_again() {
    let h = Harness::new();
    let (booking_id, user_id, seats) = pending_booking(&h, 1).await;
    let event_id = h.store.find_booking(booking_id).await.unwrap().unwrap().event_id;

    h.clock.advance(Duration::minutes(20));
    let _ = h.state.payments.process_payment(booking_id, user_id, "credit_card").await;

    let other = h.user("late");
    assert!(h.state.bookings.create_booking(other.id, event_id, &seats).await.is_ok());
}

#[tokio::test]
async fn checks_run_in_order() {
    let h = Harness::new();
    let (booking_id, owner, _) = pending_booking(&h, 1).await;
    let stranger = h.user("stranger");

    // Method is checked before the booking is even looked up.
    assert!(matches!(
        h.state.payments.process_payment(424_242, owner, "paypal").await,
        Err(AppError::InvalidPaymentMethod(m)) if m == "paypal"
    ));
    assert!(matches!(
        h.state.payments.process_payment(424_242, owner, "credit_card").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.state.payments.process_payment(booking_id, stranger.id, "credit_card").await,
        Err(AppError::Unauthorized)
    ));

    // Ownership is checked before expiry: a stranger cannot expire someone's booking.
    h.clock.advance(Duration::minutes(30));
    let _ = h.state.payments.process_payment(booking_id, stranger.id, "credit_card").await;
    let booking = h.store.find_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn payment_status_is_owner_only() {
    let h = Harness::new();
    let (booking_id, owner, seats) = pending_booking(&h, 2).await;
    let stranger = h.user("nosy");

    let snapshot = h.state.payments.payment_status(booking_id, owner).await.unwrap();
    assert_eq!(snapshot.booking.status, BookingStatus::Pending);
    assert_eq!(snapshot.seat_ids, seats);
    assert_eq!(
        snapshot.transaction.map(|t| t.status),
        Some(TransactionStatus::Pending)
    );

    assert!(matches!(
        h.state.payments.payment_status(booking_id, stranger.id).await,
        Err(AppError::Unauthorized)
    ));
}

#[tokio::test]
async fn sweep_expires_only_overdue_bookings() {
    let h = Harness::new();
    let (stale, _, stale_seats) = pending_booking(&h, 1).await;
    h.clock.advance(Duration::minutes(10));
    let (fresh, _, _) = pending_booking(&h, 1).await;

    h.clock.advance(Duration::minutes(6));
    assert_eq!(h.state.payments.sweep_expired().await.unwrap(), 1);

    assert_eq!(
        h.store.find_booking(stale).await.unwrap().unwrap().status,
        BookingStatus::Expired
    );
    assert_eq!(
        h.store.find_booking(fresh).await.unwrap().unwrap().status,
        BookingStatus::Pending
    );
    assert!(!h.store.find_seat(stale_seats[0]).await.unwrap().unwrap().is_booked);
    assert_eq!(h.state.payments.sweep_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn settlement_moves_the_booking_before_the_transaction() {
    let (h, faulty) = Harness::with_faults();
    let (booking_id, user_id, _) = pending_booking(&h, 1).await;
    let tx_id = h.store.find_transaction(booking_id).await.unwrap().unwrap().id;
    faulty.clear_ops();

    h.state
        .payments
        .process_payment(booking_id, user_id, "e_wallet")
        .await
        .unwrap();

    // Тот же порядок блокировок, что у истечения и пакета возвратов
    assert_eq!(
        faulty.ops(),
        vec![
            format!("booking {} PENDING->PAID", booking_id),
            format!("transaction {} PENDING->COMPLETED", tx_id),
            "commit".to_string(),
        ]
    );
}

#[tokio::test]
async fn unrecorded_settlement_requires_reconciliation() {
    let (h, faulty) = Harness::with_faults();
    let (booking_id, user_id, seats) = pending_booking(&h, 2).await;
    faulty.fail_settlement();

    let err = h
        .state
        .payments
        .process_payment(booking_id, user_id, "credit_card")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    match &err {
        AppError::ReconciliationRequired {
            booking_id: reported,
            external_id,
        } => {
            assert_eq!(*reported, booking_id);
            assert!(external_id.starts_with(&format!("PAY-CR-{}-", booking_id)));
        }
        other => panic!("unexpected {other:?}"),
    }

    // Ни бронь, ни транзакция не сдвинулись, места по-прежнему за бронью
    assert_eq!(
        h.store.find_booking(booking_id).await.unwrap().unwrap().status,
        BookingStatus::Pending
    );
    let tx = h.store.find_transaction(booking_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.external_id.is_none());
    for seat in seats {
        assert!(h.store.find_seat(seat).await.unwrap().unwrap().is_booked);
    }
}
