use redis::{aio::ConnectionManager, Client};

/// Shared Redis handle. `ConnectionManager` reconnects on its own after a
/// dropped connection, so a Redis restart only costs cache misses.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisClient { conn })
    }
}
