use std::sync::Arc;

use tracing::{error, info};

use crate::cache::CacheService;
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{Event, EventStatus, EventUpdate, EventWithSeats, NewEvent};
use crate::store::Store;
use crate::worker::{Job, JobQueue};

#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn Store>,
    cache: CacheService,
    clock: Arc<dyn Clock>,
    jobs: JobQueue,
}

impl EventService {
    pub fn new(store: Arc<dyn Store>, cache: CacheService, clock: Arc<dyn Clock>, jobs: JobQueue) -> Self {
        Self {
            store,
            cache,
            clock,
            jobs,
        }
    }

    pub async fn list_events(&self) -> AppResult<Vec<Event>> {
        Ok(self.cache.get_events().await?)
    }

    pub async fn get_event_with_seats(&self, event_id: i64) -> AppResult<EventWithSeats> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(AppError::EventNotFound)?;
        let seats = self.store.list_seats(event_id).await?;
        Ok(EventWithSeats { event, seats })
    }

    pub async fn create_event(&self, new: NewEvent) -> AppResult<Event> {
        if new.capacity < 1 {
            return Err(AppError::Validation("capacity must be at least 1".to_string()));
        }
        if new.price.is_sign_negative() {
            return Err(AppError::Validation("price must not be negative".to_string()));
        }

        let event = self.store.create_event(&new, self.clock.now()).await?;
        self.cache.invalidate_events().await;
        info!(event_id = event.id, capacity = event.capacity, "event created");
        Ok(event)
    }

    /// Edits details. Capacity can grow, creating the extra seats, but never shrink.
    pub async fn update_event(&self, event_id: i64, update: EventUpdate) -> AppResult<Event> {
        let current = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(AppError::EventNotFound)?;
        if current.status.is_terminal() {
            return Err(AppError::EventNotAvailable);
        }
        if update.capacity < current.capacity {
            return Err(AppError::Validation(format!(
                "capacity cannot shrink from {} to {}",
                current.capacity, update.capacity
            )));
        }

        let updated = self
            .store
            .update_event(event_id, &update, self.clock.now())
            .await?
            // Cancelled or completed between the read and the write.
            .ok_or(AppError::EventNotAvailable)?;
        self.cache.invalidate_events().await;
        info!(event_id, capacity = updated.capacity, "event updated");
        Ok(updated)
    }

    pub async fn complete_event(&self, event_id: i64) -> AppResult<()> {
        self.transition(event_id, EventStatus::Completed).await?;
        info!(event_id, "event completed");
        Ok(())
    }

    /// Marks the event CANCELLED so no new booking can start, then queues the
    /// refund batch without waiting for room in the queue. Cancelling an event that
    /// is already CANCELLED queues the batch again; the batch only moves bookings
    /// that are still PAID or PENDING, so a repeat is harmless.
    pub async fn cancel_event(&self, event_id: i64) -> AppResult<()> {
        // Очередь закрыта: статус события не меняем
        if self.jobs.is_closed() {
            return Err(AppError::QueueClosed);
        }

        let moved = self
            .store
            .transition_event(event_id, EventStatus::Available, EventStatus::Cancelled, self.clock.now())
            .await?;
        if moved {
            // Пакет ставится до первого await после смены статуса
            self.queue_refund_batch(event_id)?;
            info!(event_id, "event cancelled, refund batch queued");
            self.cache.invalidate_events().await;
            return Ok(());
        }

        match self.store.find_event(event_id).await? {
            None => Err(AppError::EventNotFound),
            Some(event) if event.status == EventStatus::Cancelled => {
                // Повторная отмена перезапускает пакет возвратов
                self.queue_refund_batch(event_id)?;
                info!(event_id, "event already cancelled, refund batch queued again");
                Ok(())
            }
            Some(_) => Err(AppError::EventNotAvailable),
        }
    }

    fn queue_refund_batch(&self, event_id: i64) -> AppResult<()> {
        self.jobs
            .submit_detached(Job::CancelEvent { event_id })
            .map_err(|e| {
                error!(event_id, error = %e, "event cancelled but refund batch could not be queued");
                AppError::from(e)
            })
    }

    async fn transition(&self, event_id: i64, to: EventStatus) -> AppResult<()> {
        let moved = self
            .store
            .transition_event(event_id, EventStatus::Available, to, self.clock.now())
            .await?;
        if !moved {
            return match self.store.find_event(event_id).await? {
                None => Err(AppError::EventNotFound),
                Some(_) => Err(AppError::EventNotAvailable),
            };
        }
        self.cache.invalidate_events().await;
        Ok(())
    }
}
