use anyhow::{anyhow, ensure, Context};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub sweeper: SweeperConfig,
    pub booking: BookingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Фоновая очистка просроченных броней
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Неположительное значение заменяется на 60 секунд при запуске.
    pub interval_secs: i64,
    pub run_timeout_secs: u64,
}

impl SweeperConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub cancel_requires_owner: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Сборка конфига из произвольного источника ключей.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            app: AppConfig {
                host: text("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8000)?,
                environment: text("ENVIRONMENT", "development"),
                rust_log: text("RUST_LOG", "seat_ledger=debug,tower_http=debug"),
                request_timeout_secs: positive(&lookup, "REQUEST_TIMEOUT_SECS", 10)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?,
                pool_size: parsed(&lookup, "DB_POOL_SIZE", 20)?,
            },
            sweeper: SweeperConfig {
                interval_secs: parsed(&lookup, "SWEEPER_INTERVAL_SECS", 30)?,
                run_timeout_secs: positive(&lookup, "SWEEPER_RUN_TIMEOUT_SECS", 5)?,
            },
            booking: BookingConfig {
                cancel_requires_owner: parsed(&lookup, "CANCEL_REQUIRES_OWNER", true)?,
            },
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}

// Таймауты строго больше нуля
fn positive<F>(lookup: &F, key: &str, default: u64) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(lookup, key, default)?;
    ensure!(value > 0, "{key} must be positive");
    Ok(value)
}
