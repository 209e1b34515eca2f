use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
    pub worker: WorkerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub json_logs: bool,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
/// Without a URL the event listing is read straight from the store.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub events_ttl_seconds: u64,
}

// Настройки JWT (только проверка подписи)
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

// Окно оплаты и имитация платежного шлюза
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub hold_minutes: i64,
    pub settlement_delay_ms: u64,
    /// Zero disables the periodic expiry sweep.
    pub expiry_sweep_interval_seconds: u64,
}

// Фоновый воркер: размер очереди и задержки имитаций
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub notification_delay_ms: u64,
    pub refund_delay_ms: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_minutes: 15,
            settlement_delay_ms: 500,
            expiry_sweep_interval_seconds: 300,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            notification_delay_ms: 1000,
            refund_delay_ms: 500,
        }
    }
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let booking = BookingConfig::default();
        let worker = WorkerConfig::default();

        let config = Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parsed("PORT", 8000)?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "seat_reservation=debug,tower_http=debug"),
                json_logs: var_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", 20)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
                events_ttl_seconds: parsed("EVENTS_CACHE_TTL_SECONDS", 600)?,
            },
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
            },
            booking: BookingConfig {
                hold_minutes: parsed("BOOKING_HOLD_MINUTES", booking.hold_minutes)?,
                settlement_delay_ms: parsed("PAYMENT_SETTLEMENT_DELAY_MS", booking.settlement_delay_ms)?,
                expiry_sweep_interval_seconds: parsed(
                    "EXPIRY_SWEEP_INTERVAL_SECONDS",
                    booking.expiry_sweep_interval_seconds,
                )?,
            },
            worker: WorkerConfig {
                queue_capacity: parsed("WORKER_QUEUE_CAPACITY", worker.queue_capacity)?,
                notification_delay_ms: parsed("NOTIFICATION_DELAY_MS", worker.notification_delay_ms)?,
                refund_delay_ms: parsed("REFUND_SETTLEMENT_DELAY_MS", worker.refund_delay_ms)?,
            },
        };

        if config.worker.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }
        if config.booking.hold_minutes <= 0 {
            return Err(ConfigError::Invalid {
                name: "BOOKING_HOLD_MINUTES",
                value: config.booking.hold_minutes.to_string(),
            });
        }
        Ok(config)
    }
}
