//! Background worker: one bounded FIFO queue, one consumer.
//!
//! All background work is serialized through the consumer. `submit` waits for
//! room when the queue is full. `WorkerHandle::shutdown` closes the queue and
//! returns once every job accepted before the close has run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod runner;

pub use runner::JobRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Single message to one booking's user.
    Notify {
        booking_id: i64,
        email: String,
        message: String,
    },
    /// Refund batch for a cancelled event.
    CancelEvent { event_id: i64 },
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::Notify { .. } => "notify",
            Job::CancelEvent { .. } => "cancel_event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("job queue is closed")]
    QueueClosed,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one job to completion. Returns false when the job failed.
    async fn handle(&self, job: Job) -> bool;
}

/// Producer side of the queue. Cheap to clone; every clone shares one close switch.
#[derive(Clone)]
pub struct JobQueue {
    sender: Arc<Mutex<Option<mpsc::Sender<Job>>>>,
}

impl JobQueue {
    pub async fn submit(&self, job: Job) -> Result<(), WorkerError> {
        let sender = self.sender.lock().clone().ok_or(WorkerError::QueueClosed)?;
        debug!(job = job.label(), "submitting job");
        sender.send(job).await.map_err(|_| WorkerError::QueueClosed)
    }

    /// Queues `job` without waiting for room. The producer slot is taken before
    /// returning: a closed queue is reported here, and an accepted job is delivered
    /// even if the caller is dropped right after. Only FIFO with respect to other
    /// detached jobs when the queue had room.
    pub fn submit_detached(&self, job: Job) -> Result<(), WorkerError> {
        let sender = self.sender.lock().clone().ok_or(WorkerError::QueueClosed)?;
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                // Очередь полна: дожидаемся места в отдельной задаче
                debug!(job = job.label(), "queue full, job waits in a detached task");
                tokio::spawn(async move {
                    if sender.send(job).await.is_err() {
                        warn!("worker stopped before a detached job was queued");
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(WorkerError::QueueClosed),
        }
    }

    /// Stops accepting jobs. Already queued jobs are still delivered.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// Consumer side, handed to [`spawn`].
pub struct JobReceiver {
    receiver: mpsc::Receiver<Job>,
}

pub fn channel(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        JobQueue {
            sender: Arc::new(Mutex::new(Some(tx))),
        },
        JobReceiver { receiver: rx },
    )
}

// Счетчики обработанных и упавших задач
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct WorkerHandle {
    queue: JobQueue,
    stats: Arc<WorkerStats>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Closes the queue and waits for the consumer to drain it.
    pub async fn shutdown(self) -> Arc<WorkerStats> {
        info!("stopping worker, draining queued jobs");
        self.queue.close();
        if let Err(e) = self.join.await {
            warn!(error = %e, "worker task ended abnormally");
        }
        info!(
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "worker stopped"
        );
        self.stats
    }
}

/// Starts the single consumer. `queue` must be the producer half paired with `receiver`.
pub fn spawn(queue: JobQueue, receiver: JobReceiver, handler: Arc<dyn JobHandler>) -> WorkerHandle {
    let stats = Arc::new(WorkerStats::default());
    let worker_stats = Arc::clone(&stats);
    let mut receiver = receiver.receiver;

    let join = tokio::spawn(async move {
        info!("worker started");
        while let Some(job) = receiver.recv().await {
            let label = job.label();
            if handler.handle(job).await {
                worker_stats.processed.fetch_add(1, Ordering::Relaxed);
            } else {
                worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = label, "job failed");
            }
        }
    });

    WorkerHandle { queue, stats, join }
}
