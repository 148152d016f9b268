//! Intake entry point: ledger, tracking hand-off and alert notification

use crate::core::clock::Clock;
use crate::db::{CellValue, RowStore, StoreError};
use crate::jobs::Tracker;
use crate::metrics::Metrics;
use crate::models::signal::columns;
use crate::models::{Checkpoint, CheckpointLabel, CheckpointPlan, CounterSnapshot, Side, Signal, SignalId};
use crate::services::market_data::{MarketDataProvider, MarketSnapshot};
use crate::services::messages::signal_message;
use crate::services::notifier::{Channel, NotificationSink};
use crate::signals::normalize::InvalidSignal;
use crate::signals::{LedgerError, SignalLedger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Accepted(Signal),
    /// Already accepted earlier; nothing was written
    Duplicate(SignalId),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] InvalidSignal),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checkpoint progress of one signal as read back from the row store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalView {
    pub signal_id: SignalId,
    pub symbol: String,
    pub side: Option<Side>,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub status: String,
    pub tracking: bool,
    pub checkpoints: Vec<Checkpoint>,
}

pub struct SignalService {
    ledger: Arc<SignalLedger>,
    tracker: Arc<Tracker>,
    notifier: Option<Arc<dyn NotificationSink>>,
    market_data: Option<Arc<dyn MarketDataProvider>>,
    metrics: Option<Arc<Metrics>>,
}

impl SignalService {
    pub fn new(ledger: Arc<SignalLedger>, tracker: Arc<Tracker>) -> Self {
        Self {
            ledger,
            tracker,
            notifier: None,
            market_data: None,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_market_data(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.market_data = Some(provider);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ledger(&self) -> &Arc<SignalLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        &self.tracker.context().clock
    }

    fn store(&self) -> &Arc<dyn RowStore> {
        &self.tracker.context().store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock().now()
    }

    /// Record one alert and hand it to the tracker.
    ///
    /// Returns once the row and counter are written; checkpoint work and the
    /// alert notification run in the background.
    pub async fn submit(
        &self,
        ticker: &str,
        raw_price: &str,
        raw_side: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, SubmitError> {
        let signal = match self
            .ledger
            .submit(ticker, raw_price, raw_side, submitted_at)
            .await
        {
            Ok(signal) => signal,
            Err(LedgerError::Duplicate(id)) => {
                debug!(signal_id = %id, ticker = %ticker, "Duplicate signal ignored");
                if let Some(ref m) = self.metrics {
                    m.signals_duplicate_total.inc();
                }
                return Ok(Submission::Duplicate(id));
            }
            Err(LedgerError::Invalid(e)) => {
                warn!(ticker = %ticker, error = %e, "Signal rejected");
                if let Some(ref m) = self.metrics {
                    m.signals_rejected_total.inc();
                }
                return Err(SubmitError::Invalid(e));
            }
            Err(LedgerError::Store(e)) => return Err(SubmitError::Store(e)),
        };

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            side = %signal.side,
            entry_price = signal.entry_price,
            "Signal accepted"
        );
        if let Some(ref m) = self.metrics {
            m.signals_accepted_total
                .with_label_values(&[signal.side.as_str()])
                .inc();
        }

        self.tracker.track(signal.clone());
        self.spawn_alert(&signal);

        Ok(Submission::Accepted(signal))
    }

    fn spawn_alert(&self, signal: &Signal) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let market_data = self.market_data.clone();
        let metrics = self.metrics.clone();
        let signal = signal.clone();

        tokio::spawn(async move {
            let snapshot = match market_data {
                Some(provider) => provider
                    .market_snapshot(&signal.symbol)
                    .await
                    .unwrap_or_else(|e| {
                        debug!(symbol = %signal.symbol, error = %e, "Market data unavailable");
                        MarketSnapshot::default()
                    }),
                None => MarketSnapshot::default(),
            };

            if let Err(e) = notifier
                .send(Channel::Trades, &signal_message(&signal, &snapshot))
                .await
            {
                warn!(signal_id = %signal.id, error = %e, "Signal notification failed");
                if let Some(ref m) = metrics {
                    m.notifications_failed_total.inc();
                }
            }
        });
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.ledger.counters()
    }

    /// `None` when the id is unknown or its row has been deleted
    pub async fn checkpoint_status(&self, id: &SignalId) -> Result<Option<SignalView>, StoreError> {
        let Some(row) = self.ledger.lookup(id) else {
            return Ok(None);
        };
        let store = self.store();
        if !store.row_exists(row).await? {
            return Ok(None);
        }

        let text = |cell: Option<CellValue>| cell.map(|c| c.as_text()).unwrap_or_default();
        let symbol = text(store.read_cell(row, columns::SYMBOL).await?);
        let side = Side::parse(&text(store.read_cell(row, columns::SIDE).await?));
        let status = text(store.read_cell(row, columns::STATUS).await?);
        let entry_price = store
            .read_cell(row, columns::ENTRY_PRICE)
            .await?
            .and_then(|c| c.as_f64());
        let entry_time = store
            .read_cell(row, columns::ENTRY_TIME)
            .await?
            .and_then(|c| c.as_timestamp());

        let mut checkpoints = Vec::with_capacity(CheckpointLabel::ALL.len());
        if let Some(entry_time) = entry_time {
            for planned in CheckpointPlan::new(entry_time).checkpoints() {
                let label = planned.label;
                let observed_price = store
                    .read_cell(row, &label.price_column())
                    .await?
                    .and_then(|c| c.as_f64());
                let pct_change = store
                    .read_cell(row, &label.pct_column())
                    .await?
                    .and_then(|c| c.as_f64());
                let applied_at = store
                    .read_cell(row, &label.applied_column())
                    .await?
                    .and_then(|c| c.as_timestamp());
                checkpoints.push(Checkpoint {
                    label,
                    due_at: planned.due_at,
                    applied_at,
                    observed_price,
                    pct_change,
                });
            }
        }

        Ok(Some(SignalView {
            signal_id: id.clone(),
            symbol,
            side,
            entry_price,
            entry_time,
            status,
            tracking: self.tracker.is_tracking(id),
            checkpoints,
        }))
    }
}
