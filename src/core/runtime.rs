//! Wiring of collaborators, ledger, tracker and reset scheduler

use crate::config::{AppConfig, RowStoreBackend};
use crate::core::clock::{Clock, SystemClock};
use crate::core::scheduler::{utc_offset, ResetScheduler, SchedulerError};
use crate::core::service::SignalService;
use crate::db::{
    MemoryRowStore, PostgresDatabase, RowStore, StoreError, REPORTS_SHEET, SIGNALS_SHEET,
};
use crate::jobs::{DailyReset, JobContext, Tracker};
use crate::metrics::Metrics;
use crate::models::{report, signal};
use crate::services::{
    BinancePriceOracle, CoinGeckoProvider, LogNotifier, MarketDataProvider, NotificationSink,
    PriceOracle, TelegramNotifier,
};
use crate::signals::SignalLedger;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("row store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Everything the runtime needs from the outside world
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub signals: Arc<dyn RowStore>,
    pub reports: Arc<dyn RowStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Real providers as selected by `config`
    pub async fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        let oracle = BinancePriceOracle::new(&config.binance_api_url, config.http_timeout)?;
        let market_data = CoinGeckoProvider::new(&config.coingecko_api_url, config.http_timeout)?;

        let notifier: Arc<dyn NotificationSink> = match config.telegram {
            Some(ref telegram) => Arc::new(TelegramNotifier::new(telegram, config.http_timeout)?),
            None => {
                info!("Telegram credentials not configured, notifications are logged only");
                Arc::new(LogNotifier)
            }
        };

        let (signals, reports): (Arc<dyn RowStore>, Arc<dyn RowStore>) = match config.row_store {
            RowStoreBackend::Memory => (
                Arc::new(MemoryRowStore::new(signal::columns::SIGNAL_ID)),
                Arc::new(MemoryRowStore::new(report::columns::DATE)),
            ),
            RowStoreBackend::Postgres => {
                let db = PostgresDatabase::connect(&config.database_url).await?;
                info!("Postgres row store connected");
                (
                    Arc::new(db.sheet(SIGNALS_SHEET, signal::columns::SIGNAL_ID)),
                    Arc::new(db.sheet(REPORTS_SHEET, report::columns::DATE)),
                )
            }
        };

        Ok(Self {
            oracle: Arc::new(oracle),
            signals,
            reports,
            notifier,
            market_data: Arc::new(market_data),
            clock: Arc::new(SystemClock),
        })
    }
}

pub struct SignalRuntime {
    config: AppConfig,
    metrics: Arc<Metrics>,
    service: Arc<SignalService>,
    tracker: Arc<Tracker>,
    scheduler: ResetScheduler,
}

impl SignalRuntime {
    pub async fn from_config(config: AppConfig) -> Result<Self, RuntimeError> {
        let collaborators = Collaborators::from_config(&config).await?;
        let metrics = Arc::new(Metrics::new()?);
        Self::with_collaborators(config, collaborators, metrics)
    }

    pub fn with_collaborators(
        config: AppConfig,
        parts: Collaborators,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RuntimeError> {
        let ctx = JobContext::new(parts.oracle, parts.signals.clone())
            .with_clock(parts.clock.clone())
            .with_metrics(metrics.clone())
            .with_fetch_retry(config.retry)
            .with_liveness_poll(config.liveness_poll);
        let tracker = Arc::new(Tracker::new(Arc::new(ctx)));

        let ledger = Arc::new(SignalLedger::new(parts.signals, config.dedup_window));

        let service = SignalService::new(ledger.clone(), tracker.clone())
            .with_notifier(parts.notifier.clone())
            .with_market_data(parts.market_data)
            .with_metrics(metrics.clone());

        let reset = DailyReset::new(ledger, parts.reports, utc_offset(config.reset_utc_offset_hours)?)
            .with_notifier(parts.notifier)
            .with_retention(config.dedup_retention)
            .with_metrics(metrics.clone());
        let scheduler = ResetScheduler::new(Arc::new(reset), &config.reset_cron, parts.clock)?;

        Ok(Self {
            config,
            metrics,
            service: Arc::new(service),
            tracker,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn service(&self) -> &Arc<SignalService> {
        &self.service
    }

    pub fn scheduler(&self) -> &ResetScheduler {
        &self.scheduler
    }

    pub async fn start(&self) {
        self.scheduler.start().await;
        info!(
            cron = %self.scheduler.cron_expr(),
            utc_offset_hours = self.config.reset_utc_offset_hours,
            "SignalRuntime: started"
        );
    }

    /// Stop the reset trigger, then drain tracking tasks within the grace period
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        let aborted = self.tracker.shutdown(self.config.shutdown_grace).await;
        info!(aborted = aborted, "SignalRuntime: shut down");
    }
}
