//! Environment-driven configuration

use crate::core::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_BINANCE_API_URL: &str = "https://api.binance.com";
pub const DEFAULT_COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_RESET_CRON: &str = "0 0 3 * * *";

/// Deployment environment (`production`, `prod`, anything else is a sandbox)
pub fn get_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string())
}

pub fn get_database_url() -> String {
    env::var("DATABASE_URL")
        .unwrap_or_else(|_| "host=localhost port=5432 user=postgres dbname=signalmeter".to_string())
}

/// Which Row Store backend holds signal rows and daily reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStoreBackend {
    Memory,
    Postgres,
}

impl FromStr for RowStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown row store backend '{}'", other)),
        }
    }
}

/// Telegram credentials; both chats may point at the same chat id
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    pub trades_chat: String,
    pub reports_chat: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub environment: String,
    pub row_store: RowStoreBackend,
    pub database_url: String,
    pub telegram: Option<TelegramConfig>,
    pub binance_api_url: String,
    pub coingecko_api_url: String,
    pub http_timeout: Duration,
    pub dedup_window: Duration,
    pub dedup_retention: Duration,
    pub retry: RetryPolicy,
    pub liveness_poll: Duration,
    pub reset_cron: String,
    pub reset_utc_offset_hours: i32,
    pub shutdown_grace: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            environment: "sandbox".to_string(),
            row_store: RowStoreBackend::Memory,
            database_url: get_database_url(),
            telegram: None,
            binance_api_url: DEFAULT_BINANCE_API_URL.to_string(),
            coingecko_api_url: DEFAULT_COINGECKO_API_URL.to_string(),
            http_timeout: Duration::from_secs(10),
            dedup_window: Duration::from_secs(60),
            dedup_retention: Duration::from_secs(48 * 3600),
            retry: RetryPolicy::default(),
            liveness_poll: Duration::from_secs(300),
            reset_cron: DEFAULT_RESET_CRON.to_string(),
            reset_utc_offset_hours: 3,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a local `.env` file.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let telegram = match env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.trim().is_empty() => {
                let trades_chat = env::var("TELEGRAM_CHAT_TRADES").unwrap_or_default();
                let reports_chat =
                    env::var("TELEGRAM_CHAT_REPORTS").unwrap_or_else(|_| trades_chat.clone());
                if trades_chat.is_empty() {
                    warn!("TELEGRAM_BOT_TOKEN set but TELEGRAM_CHAT_TRADES missing - notifications disabled");
                    None
                } else {
                    Some(TelegramConfig {
                        api_url: env::var("TELEGRAM_API_URL")
                            .unwrap_or_else(|_| DEFAULT_TELEGRAM_API_URL.to_string()),
                        bot_token: token,
                        trades_chat,
                        reports_chat,
                    })
                }
            }
            _ => None,
        };

        let row_store = match env::var("ROW_STORE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Falling back to in-memory row store");
                RowStoreBackend::Memory
            }),
            Err(_) => defaults.row_store,
        };

        let retry = RetryPolicy {
            base: secs_var("RETRY_BASE_SECONDS", defaults.retry.base),
            factor: defaults.retry.factor,
            max_delay: secs_var("RETRY_MAX_DELAY_SECONDS", defaults.retry.max_delay),
            max_times: parse_var("RETRY_MAX_TIMES", defaults.retry.max_times),
        };

        Self {
            port: parse_var("PORT", defaults.port),
            environment: get_environment(),
            row_store,
            database_url: get_database_url(),
            telegram,
            binance_api_url: env::var("BINANCE_API_URL").unwrap_or(defaults.binance_api_url),
            coingecko_api_url: env::var("COINGECKO_API_URL").unwrap_or(defaults.coingecko_api_url),
            http_timeout: secs_var("HTTP_TIMEOUT_SECONDS", defaults.http_timeout),
            dedup_window: secs_var("DEDUP_WINDOW_SECONDS", defaults.dedup_window),
            dedup_retention: Duration::from_secs(
                parse_var("DEDUP_RETENTION_HOURS", 48u64) * 3600,
            ),
            retry,
            liveness_poll: secs_var("LIVENESS_POLL_SECONDS", defaults.liveness_poll),
            reset_cron: env::var("RESET_CRON").unwrap_or(defaults.reset_cron),
            reset_utc_offset_hours: parse_var("RESET_UTC_OFFSET_HOURS", defaults.reset_utc_offset_hours),
            shutdown_grace: secs_var("SHUTDOWN_GRACE_SECONDS", defaults.shutdown_grace),
        }
    }
}

fn parse_var<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key = key, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn secs_var(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_var(key, default.as_secs()))
}
