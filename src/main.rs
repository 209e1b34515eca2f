use anyhow::Context;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, task};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use seat_reservation::{
    cache::CacheService,
    clock::SystemClock,
    config::{AppConfig, Config},
    controllers,
    database::Database,
    redis_client::RedisClient,
    services::{LogNotifier, PaymentService},
    store::{PgStore, Store},
    AppState, Settings,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.app);

    info!(environment = %config.app.environment, "starting seat reservation service");

    // Подключение к базе данных
    let db = Database::connect(&config.database.url, config.database.pool_size)
        .await
        .context("failed to connect to database")?;
    info!("database connected");
    db.run_migrations().await.context("failed to run migrations")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool.clone()));

    // Redis необязателен: без него список событий читается из базы
    let redis = match &config.redis.url {
        Some(url) => match RedisClient::connect(url).await {
            Ok(redis) => {
                info!("redis connected");
                Some(redis)
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable, event listing served from database");
                None
            }
        },
        None => None,
    };
    let cache = CacheService::new(redis, store.clone(), config.redis.events_ttl_seconds);
    cache.warmup().await;

    // Общее состояние и фоновый воркер
    let runtime = AppState::build(
        store,
        cache,
        Arc::new(SystemClock),
        Arc::new(LogNotifier::new(Duration::from_millis(
            config.worker.notification_delay_ms,
        ))),
        Settings {
            booking: config.booking.clone(),
            worker: config.worker.clone(),
            jwt: config.jwt.clone(),
        },
    );

    // --- Фоновые задачи ---
    let sweep = spawn_expiry_sweep(
        runtime.state.payments.clone(),
        config.booking.expiry_sweep_interval_seconds,
    );

    // --- Веб-сервер ---
    let app = controllers::router(runtime.state.clone()).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Сначала дожидаемся очереди воркера, потом закрываем пул
    info!("http server stopped");
    if let Some(sweep) = sweep {
        sweep.abort();
    }
    runtime.worker.shutdown().await;
    db.close().await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(app: &AppConfig) {
    let registry = tracing_subscriber::registry().with(EnvFilter::new(&app.rust_log));
    if app.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodically expires overdue PENDING bookings. `None` when disabled.
fn spawn_expiry_sweep(payments: PaymentService, interval_seconds: u64) -> Option<task::JoinHandle<()>> {
    if interval_seconds == 0 {
        info!("expiry sweep disabled");
        return None;
    }
    Some(task::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
            if let Err(e) = payments.sweep_expired().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
