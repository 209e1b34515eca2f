use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

/// Postgres pool owner. Connections are shared by every unit of work, so the
/// pool size bounds how many bookings can hold row locks at once.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;
        info!(pool_size, "postgres pool ready");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("schema up to date");
        Ok(())
    }

    /// Waits for checked-out connections to come back, then closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }
}
