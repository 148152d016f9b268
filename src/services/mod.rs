//! External collaborators: price oracle, market data, notifications

pub mod binance;
pub mod coingecko;
pub mod market_data;
pub mod messages;
pub mod notifier;

pub use binance::BinancePriceOracle;
pub use coingecko::CoinGeckoProvider;
pub use market_data::{
    MarketDataError, MarketDataProvider, MarketSnapshot, OracleError, PriceOracle,
};
pub use notifier::{Channel, LogNotifier, NotificationSink, NotifyError, TelegramNotifier};
