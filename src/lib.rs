pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use cache::CacheService;
use clock::Clock;
use config::{BookingConfig, JwtConfig, WorkerConfig};
use services::{BookingService, CancellationService, EventService, Notifier, PaymentService};
use store::Store;
use worker::{JobQueue, JobRunner, WorkerHandle};

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub events: EventService,
    pub bookings: BookingService,
    pub payments: PaymentService,
    pub jobs: JobQueue,
    pub jwt: JwtConfig,
}

/// Everything the composition root hands out: the request state and the
/// background worker that must be drained on shutdown.
pub struct Runtime {
    pub state: Arc<AppState>,
    pub worker: WorkerHandle,
}

pub struct Settings {
    pub booking: BookingConfig,
    pub worker: WorkerConfig,
    pub jwt: JwtConfig,
}

impl AppState {
    /// Wires services around one job queue and starts its consumer. Must run inside
    /// a tokio runtime.
    pub fn build(
        store: Arc<dyn Store>,
        cache: CacheService,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Runtime {
        let Settings {
            booking,
            worker: worker_config,
            jwt,
        } = settings;
        let (jobs, receiver) = worker::channel(worker_config.queue_capacity);

        let cancellation = CancellationService::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
            Duration::from_millis(worker_config.refund_delay_ms),
        );
        let handle = worker::spawn(
            jobs.clone(),
            receiver,
            Arc::new(JobRunner::new(notifier, cancellation)),
        );

        let state = Arc::new(Self {
            events: EventService::new(store.clone(), cache, clock.clone(), jobs.clone()),
            bookings: BookingService::new(
                store.clone(),
                clock.clone(),
                jobs.clone(),
                chrono::Duration::minutes(booking.hold_minutes),
            ),
            payments: PaymentService::new(
                store.clone(),
                clock,
                Duration::from_millis(booking.settlement_delay_ms),
            ),
            store,
            jobs,
            jwt,
        });

        Runtime {
            state,
            worker: handle,
        }
    }
}
