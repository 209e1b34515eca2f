use std::sync::Arc;

use tracing::info;

use crate::redis_client::RedisClient;
use crate::store::Store;

pub mod events;

/// Read-through cache in front of the store. Redis is optional; every Redis
/// failure degrades to a store read.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<RedisClient>,
    store: Arc<dyn Store>,
    events_ttl_seconds: u64,
}

impl CacheService {
    pub fn new(redis: Option<RedisClient>, store: Arc<dyn Store>, events_ttl_seconds: u64) -> Self {
        Self {
            redis,
            store,
            events_ttl_seconds,
        }
    }

    /// Store-only cache, used when Redis is not configured.
    pub fn disabled(store: Arc<dyn Store>) -> Self {
        Self::new(None, store, 0)
    }

    pub async fn warmup(&self) {
        if self.redis.is_none() {
            return;
        }
        match self.get_events().await {
            Ok(events) => info!(count = events.len(), "event listing cache warmed"),
            Err(e) => info!(error = %e, "event listing cache warmup skipped"),
        }
    }
}
