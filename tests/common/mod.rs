//! Shared fixtures: an in-memory service stack with a manual clock and a
//! notifier that records what it was asked to deliver.

#![allow(dead_code)]

pub mod faults;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use seat_reservation::cache::CacheService;
use seat_reservation::clock::ManualClock;
use seat_reservation::config::{BookingConfig, JwtConfig, WorkerConfig};
use seat_reservation::models::{Event, NewEvent, Seat, User};
use seat_reservation::services::{Notifier, NotifyError};
use seat_reservation::store::{MemoryStore, Store};
use seat_reservation::worker::WorkerHandle;
use seat_reservation::{AppState, Settings};

pub use faults::FaultyStore;

pub const JWT_SECRET: &str = "test-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub address: String,
    pub booking_id: i64,
    pub message: String,
}

/// Records deliveries. While paused, `deliver` parks until `resume`, which holds
/// the single worker on its current job.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Delivery>>,
    paused: AtomicBool,
    resumed: Notify,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    pub fn for_booking(&self, booking_id: i64) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.booking_id == booking_id)
            .collect()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    /// Calls to `deliver` so far, including parked ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` deliveries were attempted.
    pub async fn wait_for_attempts(&self, n: usize) {
        while self.attempts() < n {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, address: &str, booking_id: i64, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        loop {
            let resumed = self.resumed.notified();
            if !self.paused.load(Ordering::SeqCst) {
                break;
            }
            resumed.await;
        }
        self.delivered.lock().push(Delivery {
            address: address.to_string(),
            booking_id,
            message: message.to_string(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: Arc<AppState>,
    pub worker: WorkerHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue_capacity(100)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store, queue_capacity)
    }

    /// Services run on a [`FaultyStore`] sharing `store`'s tables, so assertions
    /// through `store` see every committed write.
    pub fn with_faults() -> (Self, Arc<FaultyStore>) {
        let store = Arc::new(MemoryStore::new());
        let faulty = Arc::new(FaultyStore::new(MemoryStore::clone(&store)));
        (Self::build(store, faulty.clone(), 100), faulty)
    }

    fn build(store: Arc<MemoryStore>, backing: Arc<dyn Store>, queue_capacity: usize) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(RecordingNotifier::default());

        let runtime = AppState::build(
            backing.clone(),
            CacheService::disabled(backing),
            clock.clone(),
            notifier.clone(),
            Settings {
                booking: BookingConfig {
                    hold_minutes: 15,
                    settlement_delay_ms: 0,
                    expiry_sweep_interval_seconds: 0,
                },
                worker: WorkerConfig {
                    queue_capacity,
                    notification_delay_ms: 0,
                    refund_delay_ms: 0,
                },
                jwt: JwtConfig {
                    secret: JWT_SECRET.to_string(),
                },
            },
        );

        Self {
            store,
            clock,
            notifier,
            state: runtime.state,
            worker: runtime.worker,
        }
    }

    pub fn user(&self, name: &str) -> User {
        self.store
            .insert_user(name, &format!("{}@example.com", name.to_lowercase()), "user")
    }

    /// Creates an AVAILABLE event whose seats all cost `price`.
    pub async fn event(&self, capacity: i32, price: Decimal) -> (Event, Vec<Seat>) {
        let event = self
            .state
            .events
            .create_event(NewEvent {
                name: "Chamber Concert".to_string(),
                location: "Main Hall".to_string(),
                date: Utc::now() + Duration::days(14),
                capacity,
                category: "REGULAR".to_string(),
                price,
            })
            .await
            .unwrap();
        let seats = self.store.list_seats(event.id).await.unwrap();
        (event, seats)
    }
}

pub fn seat_ids(seats: &[Seat]) -> Vec<i64> {
    seats.iter().map(|s| s.id).collect()
}
