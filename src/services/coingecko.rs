//! CoinGecko market cap / volume lookup

use crate::services::market_data::{MarketDataError, MarketDataProvider, MarketSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    #[serde(default)]
    market_data: Option<CoinMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    #[serde(default)]
    market_cap: HashMap<String, Option<f64>>,
    #[serde(default)]
    total_volume: HashMap<String, Option<f64>>,
}

pub struct CoinGeckoProvider {
    base_url: String,
    client: reqwest::Client,
    /// symbol (lowercase) → coin id
    coin_ids: RwLock<HashMap<String, String>>,
}

impl CoinGeckoProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            coin_ids: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve_coin_id(&self, symbol: &str) -> Result<String, MarketDataError> {
        let key = symbol.to_ascii_lowercase();
        if let Some(id) = self.coin_ids.read().await.get(&key) {
            return Ok(id.clone());
        }

        let coins: Vec<CoinListEntry> = self
            .client
            .get(format!("{}/coins/list", self.base_url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MarketDataError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| MarketDataError::Request(format!("invalid coins list: {}", e)))?;

        let id = coins
            .into_iter()
            .find(|c| c.symbol.eq_ignore_ascii_case(&key))
            .map(|c| c.id)
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.to_string()))?;

        self.coin_ids.write().await.insert(key, id.clone());
        Ok(id)
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketDataError> {
        let id = self.resolve_coin_id(symbol).await?;

        let detail: CoinDetail = self
            .client
            .get(format!("{}/coins/{}", self.base_url, id))
            .query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MarketDataError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| MarketDataError::Request(format!("invalid coin payload: {}", e)))?;

        let Some(market) = detail.market_data else {
            warn!(symbol = %symbol, coin_id = %id, "CoinGecko returned no market data");
            return Ok(MarketSnapshot::default());
        };

        let snapshot = MarketSnapshot {
            market_cap: market.market_cap.get("usd").copied().flatten(),
            volume_24h: market.total_volume.get("usd").copied().flatten(),
        };
        debug!(
            symbol = %symbol,
            coin_id = %id,
            market_cap = ?snapshot.market_cap,
            volume_24h = ?snapshot.volume_24h,
            "Fetched market snapshot"
        );
        Ok(snapshot)
    }
}
