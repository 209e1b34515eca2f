//! Background queue behaviour observed through its public handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use seat_reservation::worker::{self, Job, JobHandler, WorkerError};

fn notify(booking_id: i64) -> Job {
    Job::Notify {
        booking_id,
        email: format!("user{}@example.com", booking_id),
        message: "hello".to_string(),
    }
}

fn booking_of(job: &Job) -> i64 {
    match job {
        Job::Notify { booking_id, .. } => *booking_id,
        Job::CancelEvent { event_id } => *event_id,
    }
}

#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl JobHandler for Collector {
    async fn handle(&self, job: Job) -> bool {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let id = booking_of(&job);
        self.seen.lock().push(id);
        // Odd ids fail so both counters move.
        id % 2 == 0
    }
}

/// Handler that only finishes a job once the test hands it a permit.
struct Gated {
    gate: Semaphore,
    started: AtomicUsize,
}

#[async_trait]
impl JobHandler for Gated {
    async fn handle(&self, _job: Job) -> bool {
        self.started.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }
}

#[tokio::test]
async fn shutdown_waits_for_every_accepted_job() {
    let collector = Arc::new(Collector::default());
    let (queue, receiver) = worker::channel(8);
    let handle = worker::spawn(queue.clone(), receiver, collector.clone());

    for id in 0..40 {
        queue.submit(notify(id)).await.unwrap();
    }
    let stats = handle.shutdown().await;

    assert_eq!(*collector.seen.lock(), (0..40).collect::<Vec<_>>());
    assert_eq!(stats.processed(), 20);
    assert_eq!(stats.failed(), 20);
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() {
    let (queue, receiver) = worker::channel(2);
    let handle = worker::spawn(queue.clone(), receiver, Arc::new(Collector::default()));
    let producer = queue.clone();

    handle.shutdown().await;

    assert!(producer.is_closed());
    assert_eq!(
        producer.submit(Job::CancelEvent { event_id: 3 }).await,
        Err(WorkerError::QueueClosed)
    );
}

#[tokio::test]
async fn full_queue_makes_producers_wait() {
    let gated = Arc::new(Gated {
        gate: Semaphore::new(0),
        started: AtomicUsize::new(0),
    });
    let (queue, receiver) = worker::channel(1);
    let handle = worker::spawn(queue.clone(), receiver, gated.clone());

    // First job is picked up and parks in the handler.
    queue.submit(notify(1)).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // Second fills the single buffer slot; the third has nowhere to go.
    queue.submit(notify(2)).await.unwrap();
    assert!(timeout(Duration::from_millis(50), queue.submit(notify(3)))
        .await
        .is_err());

    gated.gate.add_permits(3);
    timeout(Duration::from_secs(2), queue.submit(notify(3)))
        .await
        .unwrap()
        .unwrap();

    let stats = handle.shutdown().await;
    assert_eq!(stats.processed(), 3);
    assert_eq!(stats.failed(), 0);
}

#[tokio::test]
async fn stats_are_visible_while_running() {
    let collector = Arc::new(Collector::default());
    let (queue, receiver) = worker::channel(4);
    let handle = worker::spawn(queue.clone(), receiver, collector);
    let stats = handle.stats();

    queue.submit(notify(2)).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while stats.processed() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown().await;
    assert_eq!(stats.processed(), 1);
}
