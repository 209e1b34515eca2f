use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery to {address} failed: {reason}")]
    Delivery { address: String, reason: String },
}

/// Fire-and-forget message delivery. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, address: &str, booking_id: i64, message: &str) -> Result<(), NotifyError>;
}

/// Writes each message to the log after a simulated delivery delay.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    delay: Duration,
}

impl LogNotifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, address: &str, booking_id: i64, message: &str) -> Result<(), NotifyError> {
        info!(to = %address, booking_id, "sending notification");
        tokio::time::sleep(self.delay).await;
        info!(to = %address, booking_id, message, "notification delivered");
        Ok(())
    }
}
