//! Input validation, ticker normalization and content-derived ids

use crate::models::{Side, SignalId};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Quote currencies stripped from the end of a ticker, longest first
const QUOTE_SUFFIXES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];
/// Perpetual contract markers, longest first
const PERP_SUFFIXES: [&str; 3] = ["-PERP", "PERP", ".P"];
const SEPARATORS: [char; 3] = ['-', '/', '_'];

const ID_HEX_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidSignal {
    #[error("unsupported side '{0}', expected buy or sell")]
    UnknownSide(String),
    #[error("price '{0}' is not a finite positive number")]
    InvalidPrice(String),
    #[error("ticker is empty")]
    EmptyTicker,
}

pub fn parse_side(raw: &str) -> Result<Side, InvalidSignal> {
    Side::parse(raw).ok_or_else(|| InvalidSignal::UnknownSide(raw.to_string()))
}

pub fn parse_price(raw: &str) -> Result<f64, InvalidSignal> {
    match raw.trim().parse::<f64>() {
        Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
        _ => Err(InvalidSignal::InvalidPrice(raw.to_string())),
    }
}

/// Reduce an exchange ticker to its base asset: `BINANCE:BTCUSDT.P` → `BTC`.
///
/// A ticker that is nothing but a quote currency is kept as-is.
pub fn normalize_symbol(ticker: &str) -> Result<String, InvalidSignal> {
    let mut symbol = ticker.trim().to_ascii_uppercase();
    if let Some((_, rest)) = symbol.split_once(':') {
        symbol = rest.to_string();
    }

    for suffix in PERP_SUFFIXES {
        if let Some(stripped) = symbol.strip_suffix(suffix) {
            symbol = stripped.to_string();
            break;
        }
    }
    symbol = symbol.trim_end_matches(SEPARATORS).to_string();
    for suffix in QUOTE_SUFFIXES {
        if let Some(stripped) = symbol.strip_suffix(suffix) {
            if !stripped.is_empty() {
                symbol = stripped.to_string();
            }
            break;
        }
    }

    let symbol = symbol.trim_end_matches(SEPARATORS).to_string();
    if symbol.is_empty() {
        return Err(InvalidSignal::EmptyTicker);
    }
    Ok(symbol)
}

/// Start of the dedup window containing `at`, as a bucket number
pub fn time_bucket(at: DateTime<Utc>, window: Duration) -> i64 {
    let width = window.as_secs().max(1) as i64;
    at.timestamp().div_euclid(width)
}

/// Hash of the normalized `(ticker, price, side, time bucket)` tuple.
///
/// Identical alerts re-delivered inside one window collapse onto the same id;
/// the bucket keeps genuine repeats in later windows distinct.
pub fn signal_id(
    ticker: &str,
    price: f64,
    side: Side,
    submitted_at: DateTime<Utc>,
    window: Duration,
) -> SignalId {
    let canonical = format!(
        "{}|{}|{}|{}",
        ticker.trim().to_ascii_uppercase(),
        price,
        side.as_str(),
        time_bucket(submitted_at, window)
    );
    let digest = Sha256::digest(canonical.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_HEX_LEN);
    SignalId::new(id)
}
