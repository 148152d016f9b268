//! HTTP collaborators against mocked Binance, CoinGecko and Telegram APIs

use std::time::Duration;

use serde_json::json;
use signalmeter::config::TelegramConfig;
use signalmeter::services::market_data::{MarketDataProvider, OracleError, PriceOracle};
use signalmeter::services::notifier::{Channel, NotificationSink, NotifyError};
use signalmeter::services::{BinancePriceOracle, CoinGeckoProvider, TelegramNotifier};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn oracle(server: &MockServer) -> BinancePriceOracle {
    BinancePriceOracle::new(server.uri(), Duration::from_secs(5)).expect("http client")
}

#[tokio::test]
async fn binance_price_is_parsed_from_the_ticker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "symbol": "BTCUSDT", "price": "64123.45000000" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let price = oracle(&server).price("btc").await.unwrap();
    assert!((price - 64123.45).abs() < 1e-9);
}

#[tokio::test]
async fn binance_invalid_symbol_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "code": -1121, "msg": "Invalid symbol." })),
        )
        .mount(&server)
        .await;

    let err = oracle(&server).price("NOPE").await.unwrap_err();
    assert_eq!(err, OracleError::NotFound("NOPEUSDT".to_string()));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn binance_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = oracle(&server).price("BTC").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn binance_rejects_non_positive_prices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "symbol": "BTCUSDT", "price": "0" })),
        )
        .mount(&server)
        .await;

    assert!(matches!(
        oracle(&server).price("BTC").await,
        Err(OracleError::Unavailable(_))
    ));
}

#[tokio::test]
async fn coingecko_resolves_the_coin_once_and_reads_usd_figures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "bitcoin", "symbol": "btc", "name": "Bitcoin" },
            { "id": "ethereum", "symbol": "eth", "name": "Ethereum" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin"))
        .and(query_param("localization", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bitcoin",
            "market_data": {
                "market_cap": { "usd": 1250000000000.0, "eur": 1150000000000.0 },
                "total_volume": { "usd": 35000000000.0 }
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let provider = CoinGeckoProvider::new(server.uri(), Duration::from_secs(5)).unwrap();
    let first = provider.market_snapshot("BTC").await.unwrap();
    let second = provider.market_snapshot("btc").await.unwrap();

    assert_eq!(first.market_cap, Some(1_250_000_000_000.0));
    assert_eq!(first.volume_24h, Some(35_000_000_000.0));
    assert_eq!(first, second);
}

#[tokio::test]
async fn coingecko_unknown_symbol_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "bitcoin", "symbol": "btc", "name": "Bitcoin" }
        ])))
        .mount(&server)
        .await;

    let provider = CoinGeckoProvider::new(server.uri(), Duration::from_secs(5)).unwrap();
    assert!(provider.market_snapshot("ZZZ").await.is_err());
}

fn telegram_config(server: &MockServer) -> TelegramConfig {
    TelegramConfig {
        api_url: server.uri(),
        bot_token: "123:abc".to_string(),
        trades_chat: "-100111".to_string(),
        reports_chat: "-100222".to_string(),
    }
}

#[tokio::test]
async fn telegram_routes_channels_to_their_chats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .and(body_partial_json(json!({
            "chat_id": "-100222",
            "parse_mode": "Markdown",
            "text": "report"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new(&telegram_config(&server), Duration::from_secs(5)).unwrap();
    notifier.send(Channel::Reports, "report").await.unwrap();
}

#[tokio::test]
async fn telegram_rejection_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden: bot was blocked"))
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new(&telegram_config(&server), Duration::from_secs(5)).unwrap();
    match notifier.send(Channel::Trades, "hello").await {
        Err(NotifyError::Rejected { status, body }) => {
            assert_eq!(status, 403);
            assert!(body.contains("blocked"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
