//! Binance spot ticker price oracle

use crate::services::market_data::{OracleError, PriceOracle};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Binance error code for an unknown trading pair
const INVALID_SYMBOL: i64 = -1121;
/// Quote asset appended to the base symbol to form the trading pair
const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    msg: String,
}

pub struct BinancePriceOracle {
    base_url: String,
    client: reqwest::Client,
}

impl BinancePriceOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_ascii_uppercase(), QUOTE_ASSET)
    }
}

#[async_trait]
impl PriceOracle for BinancePriceOracle {
    async fn price(&self, symbol: &str) -> Result<f64, OracleError> {
        let pair = self.pair(symbol);
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", pair.as_str())])
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("request for {} failed: {}", pair, e)))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
                if err.code == INVALID_SYMBOL {
                    return Err(OracleError::NotFound(pair));
                }
                return Err(OracleError::Unavailable(format!("{} ({})", err.msg, err.code)));
            }
            return Err(OracleError::Unavailable(format!("HTTP 400: {}", body)));
        }
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("HTTP {} for {}", status, pair)));
        }

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| OracleError::Unavailable(format!("malformed ticker for {}: {}", pair, e)))?;

        let price: f64 = ticker
            .price
            .parse()
            .map_err(|_| OracleError::Unavailable(format!("malformed price '{}'", ticker.price)))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(OracleError::Unavailable(format!("non-positive price {} for {}", price, pair)));
        }

        debug!(symbol = %symbol, pair = %pair, price = price, "Fetched live price");
        Ok(price)
    }
}
