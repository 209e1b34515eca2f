use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::models::Event;
use crate::store::StoreError;

const EVENTS_KEY: &str = "events:list_all";

impl CacheService {
    pub async fn get_events(&self) -> Result<Vec<Event>, StoreError> {
        match self.get_events_from_cache().await {
            Ok(Some(events)) => {
                debug!(count = events.len(), "event listing served from cache");
                return Ok(events);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "event cache read failed, falling back to store"),
        }

        let events = self.store.list_events().await?;
        if let Err(e) = self.save_events_to_cache(&events).await {
            warn!(error = %e, "event cache write failed");
        }
        Ok(events)
    }

    /// Drops the cached listing. Called after every event write.
    pub async fn invalidate_events(&self) {
        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.conn.clone();
        let result: redis::RedisResult<()> = conn.del(EVENTS_KEY).await;
        if let Err(e) = result {
            warn!(error = %e, "event cache invalidation failed");
        }
    }

    async fn get_events_from_cache(&self) -> redis::RedisResult<Option<Vec<Event>>> {
        let Some(redis) = &self.redis else {
            return Ok(None);
        };
        let mut conn = redis.conn.clone();
        let data: Option<String> = conn.get(EVENTS_KEY).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        // A payload from an older build is treated as a miss.
        Ok(serde_json::from_str(&data).ok())
    }

    async fn save_events_to_cache(&self, events: &[Event]) -> redis::RedisResult<()> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };
        let data = serde_json::to_string(events).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "serialize error"))
        })?;
        let mut conn = redis.conn.clone();
        conn.set_ex(EVENTS_KEY, data, self.events_ttl_seconds).await
    }
}
