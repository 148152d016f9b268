//! Unit tests for configuration defaults and parsing

use signalmeter::config::{AppConfig, RowStoreBackend, DEFAULT_RESET_CRON};
use signalmeter::logging::LogFormat;
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = AppConfig::default();
    assert_eq!(config.port, 8080);
    assert_eq!(config.row_store, RowStoreBackend::Memory);
    assert!(config.telegram.is_none());
    assert_eq!(config.dedup_window, Duration::from_secs(60));
    assert_eq!(config.dedup_retention, Duration::from_secs(48 * 3600));
    assert_eq!(config.liveness_poll, Duration::from_secs(300));
    assert_eq!(config.reset_cron, DEFAULT_RESET_CRON);
    assert_eq!(config.reset_utc_offset_hours, 3);
    assert_eq!(config.retry.max_times, 4);
}

#[test]
fn test_row_store_backend_parsing() {
    assert_eq!("memory".parse::<RowStoreBackend>(), Ok(RowStoreBackend::Memory));
    assert_eq!(" Postgres ".parse::<RowStoreBackend>(), Ok(RowStoreBackend::Postgres));
    assert_eq!("pg".parse::<RowStoreBackend>(), Ok(RowStoreBackend::Postgres));
    assert!("sheets".parse::<RowStoreBackend>().is_err());
}

#[test]
fn test_log_format_for_environment() {
    assert_eq!(LogFormat::for_environment("production"), LogFormat::Json);
    assert_eq!(LogFormat::for_environment("prod"), LogFormat::Json);
    assert_eq!(LogFormat::for_environment("sandbox"), LogFormat::Pretty);
}
