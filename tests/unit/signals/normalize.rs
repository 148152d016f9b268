//! Unit tests for input validation and signal ids

use chrono::{TimeZone, Utc};
use signalmeter::models::Side;
use signalmeter::signals::normalize::{
    normalize_symbol, parse_price, parse_side, signal_id, time_bucket, InvalidSignal,
};
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(60);

#[test]
fn test_symbol_normalization() {
    assert_eq!(normalize_symbol("BINANCE:BTCUSDT").unwrap(), "BTC");
    assert_eq!(normalize_symbol("BINANCE:BTCUSDT.P").unwrap(), "BTC");
    assert_eq!(normalize_symbol("ethusdc").unwrap(), "ETH");
    assert_eq!(normalize_symbol(" SOLPERP ").unwrap(), "SOL");
    assert_eq!(normalize_symbol("BTC-PERP").unwrap(), "BTC");
    assert_eq!(normalize_symbol("XRP/USD").unwrap(), "XRP");
    assert_eq!(normalize_symbol("DOGE").unwrap(), "DOGE");
    assert_eq!(normalize_symbol("USDT").unwrap(), "USDT");
}

#[test]
fn test_dashed_perpetual_tickers() {
    assert_eq!(normalize_symbol("BTCUSDT-PERP").unwrap(), "BTC");
    assert_eq!(normalize_symbol("BINANCE:ETHUSDT-PERP").unwrap(), "ETH");
    assert_eq!(normalize_symbol("sol-usdt-perp").unwrap(), "SOL");
    assert_eq!(normalize_symbol("BTC-USDT").unwrap(), "BTC");
}

#[test]
fn test_empty_ticker_is_invalid() {
    assert_eq!(normalize_symbol(""), Err(InvalidSignal::EmptyTicker));
    assert_eq!(normalize_symbol("BINANCE:"), Err(InvalidSignal::EmptyTicker));
    assert_eq!(normalize_symbol("  "), Err(InvalidSignal::EmptyTicker));
}

#[test]
fn test_side_parsing() {
    assert_eq!(parse_side("buy").unwrap(), Side::Buy);
    assert_eq!(parse_side(" SELL ").unwrap(), Side::Sell);
    assert!(matches!(parse_side("hold"), Err(InvalidSignal::UnknownSide(_))));
    assert!(parse_side("").is_err());
}

#[test]
fn test_price_parsing() {
    assert_eq!(parse_price("64000.5").unwrap(), 64000.5);
    assert_eq!(parse_price(" 1e3 ").unwrap(), 1000.0);
    for bad in ["0", "-1", "abc", "", "NaN", "inf"] {
        assert!(
            matches!(parse_price(bad), Err(InvalidSignal::InvalidPrice(_))),
            "{bad} should be rejected"
        );
    }
}

#[test]
fn test_signal_id_is_stable_within_a_window() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 50).unwrap();

    let a = signal_id("BTCUSDT", 100.0, Side::Buy, at, WINDOW);
    let b = signal_id(" btcusdt ", 100.0, Side::Buy, later, WINDOW);
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 16);
    assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_signal_id_changes_with_content_and_window() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
    let base = signal_id("BTCUSDT", 100.0, Side::Buy, at, WINDOW);

    assert_ne!(base, signal_id("BTCUSDT", 100.5, Side::Buy, at, WINDOW));
    assert_ne!(base, signal_id("BTCUSDT", 100.0, Side::Sell, at, WINDOW));
    assert_ne!(base, signal_id("ETHUSDT", 100.0, Side::Buy, at, WINDOW));
    let next_minute = at + chrono::Duration::seconds(60);
    assert_ne!(base, signal_id("BTCUSDT", 100.0, Side::Buy, next_minute, WINDOW));
}

#[test]
fn test_time_bucket() {
    let at = Utc.with_ymd_and_hms(1970, 1, 1, 0, 2, 30).unwrap();
    assert_eq!(time_bucket(at, WINDOW), 2);
    assert_eq!(time_bucket(at, Duration::ZERO), 150);
}
