//! Daily counter snapshot and reset

use crate::db::{CellValue, RowStore, StoreError};
use crate::metrics::Metrics;
use crate::models::report::columns;
use crate::models::DailyReport;
use crate::services::messages::daily_report_message;
use crate::services::notifier::{Channel, NotificationSink};
use crate::signals::SignalLedger;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const DEFAULT_RETENTION: Duration = Duration::from_secs(48 * 3600);

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("failed to record daily report: {0}")]
    Store(#[from] StoreError),
}

pub struct DailyReset {
    ledger: Arc<SignalLedger>,
    reports: Arc<dyn RowStore>,
    notifier: Option<Arc<dyn NotificationSink>>,
    offset: FixedOffset,
    retention: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl DailyReset {
    pub fn new(ledger: Arc<SignalLedger>, reports: Arc<dyn RowStore>, offset: FixedOffset) -> Self {
        Self {
            ledger,
            reports,
            notifier: None,
            offset,
            retention: DEFAULT_RETENTION,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// How long dedup entries outlive their signal
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Snapshot and zero the counter, then persist the report.
    ///
    /// A failed report write puts the snapshot back so no increment is lost.
    /// Notification failures are logged and do not affect the result.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DailyReport, ResetError> {
        let date = now.with_timezone(&self.offset).date_naive();
        let snapshot = self.ledger.take_counters();
        let report = DailyReport::new(date, snapshot);

        let fields = vec![
            (columns::DATE.to_string(), CellValue::from(date.to_string())),
            (columns::BUY_COUNT.to_string(), CellValue::from(report.buy_count)),
            (columns::SELL_COUNT.to_string(), CellValue::from(report.sell_count)),
            (columns::TOTAL.to_string(), CellValue::from(report.total())),
        ];
        if let Err(e) = self.reports.append_row(fields).await {
            self.ledger.restore_counters(snapshot);
            error!(date = %date, error = %e, "Failed to record daily report, counters restored");
            return Err(ResetError::Store(e));
        }

        info!(
            date = %date,
            buy_count = report.buy_count,
            sell_count = report.sell_count,
            "Daily counters reset"
        );
        if let Some(ref m) = self.metrics {
            m.daily_resets_total.inc();
        }

        if let Some(ref notifier) = self.notifier {
            if let Err(e) = notifier
                .send(Channel::Reports, &daily_report_message(&report))
                .await
            {
                warn!(date = %date, error = %e, "Daily report notification failed");
                if let Some(ref m) = self.metrics {
                    m.notifications_failed_total.inc();
                }
            }
        }

        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            let pruned = self.ledger.prune(cutoff);
            if pruned > 0 {
                info!(pruned = pruned, "Pruned expired dedup entries");
            }
        }

        Ok(report)
    }
}
