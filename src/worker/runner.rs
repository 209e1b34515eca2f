use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{Job, JobHandler};
use crate::services::cancellation::CancellationService;
use crate::services::notifier::Notifier;

/// Dispatches queued jobs to the notifier and the refund orchestrator.
pub struct JobRunner {
    notifier: Arc<dyn Notifier>,
    cancellation: CancellationService,
}

impl JobRunner {
    pub fn new(notifier: Arc<dyn Notifier>, cancellation: CancellationService) -> Self {
        Self {
            notifier,
            cancellation,
        }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: Job) -> bool {
        match job {
            Job::Notify {
                booking_id,
                email,
                message,
            } => match self.notifier.deliver(&email, booking_id, &message).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(booking_id, error = %e, "notification failed");
                    false
                }
            },
            Job::CancelEvent { event_id } => match self.cancellation.process_event(event_id).await {
                Ok(report) => report.failed == 0,
                Err(e) => {
                    error!(event_id, error = %e, "refund batch aborted");
                    false
                }
            },
        }
    }
}
