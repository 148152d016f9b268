//! Market data collaborator interfaces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    /// Timeout, network failure, 5xx or a malformed payload
    #[error("price oracle unavailable: {0}")]
    Unavailable(String),
    #[error("unknown symbol: {0}")]
    NotFound(String),
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Live price source. Calls are independent and may run concurrently.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, symbol: &str) -> Result<f64, OracleError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data request failed: {0}")]
    Request(String),
    #[error("no coin matches symbol {0}")]
    UnknownSymbol(String),
}

/// Descriptive market statistics used to enrich intake notifications
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketDataError>;
}
