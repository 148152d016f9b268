//! Checkpoint tracking task for a single signal
//!
//! The task walks the signal's checkpoints in due order:
//! `Scheduled → Waiting → Fetching → Applying → Scheduled(next) … → Completed`,
//! or stops early in `Abandoned` when the backing row disappears or the
//! process shuts down. Failures are scoped to one checkpoint: an exhausted
//! retry budget abandons that checkpoint and the task moves on.

use crate::core::retry::RetryPolicy;
use crate::db::{CellValue, StoreError};
use crate::jobs::context::JobContext;
use crate::models::signal::columns;
use crate::models::{pct_change, CheckpointLabel, CheckpointPlan, Signal, SignalId, SignalStatus};
use crate::services::market_data::OracleError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled(CheckpointLabel),
    Waiting(CheckpointLabel),
    Fetching(CheckpointLabel),
    Applying(CheckpointLabel),
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbandonReason {
    /// Every attempt inside the retry budget failed transiently
    OracleExhausted(String),
    SymbolNotFound(String),
    StoreFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointResult {
    Applied {
        price: f64,
        pct_change: f64,
        applied_at: DateTime<Utc>,
    },
    /// A price left behind by an interrupted pass was verified and completed
    Reconciled {
        price: f64,
        pct_change: f64,
        applied_at: DateTime<Utc>,
    },
    AlreadyApplied,
    Abandoned(AbandonReason),
}

impl CheckpointResult {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Abandoned(_))
    }

    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Applied { applied_at, .. } | Self::Reconciled { applied_at, .. } => {
                Some(*applied_at)
            }
            _ => None,
        }
    }
}

/// Why a task stopped before reaching its last checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    RowMissing(CheckpointLabel),
    Shutdown(CheckpointLabel),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackReport {
    pub signal_id: SignalId,
    /// `Completed` or `Abandoned`
    pub state: TaskState,
    pub stop: Option<StopReason>,
    pub results: Vec<(CheckpointLabel, CheckpointResult)>,
}

impl TrackReport {
    pub fn result(&self, label: CheckpointLabel) -> Option<&CheckpointResult> {
        self.results
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, r)| r)
    }

    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_applied()).count()
    }
}

enum Wake {
    Due,
    RowDeleted,
    Shutdown,
}

pub struct CheckpointTask {
    signal: Signal,
    plan: CheckpointPlan,
    ctx: Arc<JobContext>,
    shutdown: watch::Receiver<bool>,
    state: TaskState,
}

impl CheckpointTask {
    pub fn new(signal: Signal, ctx: Arc<JobContext>, shutdown: watch::Receiver<bool>) -> Self {
        let plan = CheckpointPlan::new(signal.entry_time);
        Self {
            signal,
            plan,
            ctx,
            shutdown,
            state: TaskState::Scheduled(CheckpointLabel::M15),
        }
    }

    pub async fn run(mut self) -> TrackReport {
        let schedule: Vec<(CheckpointLabel, DateTime<Utc>)> = self
            .plan
            .checkpoints()
            .iter()
            .map(|c| (c.label, c.due_at))
            .collect();
        let mut results = Vec::with_capacity(schedule.len());

        for (i, (label, due_at)) in schedule.iter().copied().enumerate() {
            self.transition(TaskState::Scheduled(label));
            self.transition(TaskState::Waiting(label));

            match self.wait_until(due_at).await {
                Wake::Due => {}
                Wake::RowDeleted => return self.abandon(StopReason::RowMissing(label), results),
                Wake::Shutdown => return self.abandon(StopReason::Shutdown(label), results),
            }

            if let Err(stop) = self.reconcile_earlier(label, &mut results).await {
                return self.abandon(stop, results);
            }

            let next_due = schedule.get(i + 1).map(|(_, due)| *due);
            match self.process(label, next_due).await {
                Ok(result) => {
                    self.record(label, &result);
                    results.push((label, result));
                }
                Err(stop) => return self.abandon(stop, results),
            }
        }

        if let Err(stop) = self.reconcile_earlier(CheckpointLabel::D1, &mut results).await {
            return self.abandon(stop, results);
        }
        self.finish(results).await
    }

    fn transition(&mut self, next: TaskState) {
        debug!(
            signal_id = %self.signal.id,
            from = ?self.state,
            to = ?next,
            "Tracking state change"
        );
        self.state = next;
    }

    /// Sleep until `due_at`, checking the row between liveness slices
    async fn wait_until(&mut self, due_at: DateTime<Utc>) -> Wake {
        let ctx = self.ctx.clone();
        loop {
            let remaining = ctx.clock.until(due_at);
            if remaining.is_zero() {
                return Wake::Due;
            }
            let slice = remaining.min(ctx.liveness_poll);

            tokio::select! {
                _ = tokio::time::sleep(slice) => {}
                _ = shutdown_requested(&mut self.shutdown) => return Wake::Shutdown,
            }

            if slice < remaining {
                match ctx.store.row_exists(self.signal.row_id).await {
                    Ok(false) => return Wake::RowDeleted,
                    Ok(true) => {}
                    Err(e) => {
                        debug!(signal_id = %self.signal.id, error = %e, "Liveness check failed, re-checking at due time");
                    }
                }
            }
        }
    }

    /// Complete abandoned checkpoints whose price made it to the row but whose
    /// pct or applied mark did not. `current` names the stop point if the row
    /// turns out to be gone.
    async fn reconcile_earlier(
        &mut self,
        current: CheckpointLabel,
        results: &mut [(CheckpointLabel, CheckpointResult)],
    ) -> Result<(), StopReason> {
        for (label, result) in results.iter_mut() {
            if result.is_applied() {
                continue;
            }
            let Some(price) = self.half_written_price(*label, current).await? else {
                continue;
            };

            info!(
                signal_id = %self.signal.id,
                checkpoint = %label,
                price = price,
                "Reconciling half-written checkpoint"
            );
            let reconciled = self.complete(*label, price, true).await.map_err(|_| {
                StopReason::RowMissing(current)
            })?;
            if reconciled.is_applied() {
                self.record(*label, &reconciled);
                *result = reconciled;
            }
        }
        Ok(())
    }

    /// Stored price of `label` when its applied mark is still blank
    async fn half_written_price(
        &self,
        label: CheckpointLabel,
        current: CheckpointLabel,
    ) -> Result<Option<f64>, StopReason> {
        match self.unapplied_price_cell(label).await {
            Ok(price) => Ok(price
                .and_then(|cell| cell.as_f64())
                .filter(|p| p.is_finite() && *p > 0.0)),
            Err(StoreError::RowMissing(_)) => Err(StopReason::RowMissing(current)),
            Err(e) => {
                debug!(signal_id = %self.signal.id, checkpoint = %label, error = %e, "Reconcile check failed, leaving checkpoint as is");
                Ok(None)
            }
        }
    }

    async fn unapplied_price_cell(&self, label: CheckpointLabel) -> Result<Option<CellValue>, StoreError> {
        let applied = self.read(label, &label.applied_column()).await?;
        if applied.is_some_and(|cell| !cell.is_blank()) {
            return Ok(None);
        }
        self.read(label, &label.price_column()).await
    }

    async fn process(
        &mut self,
        label: CheckpointLabel,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<CheckpointResult, StopReason> {
        let price_col = label.price_column();
        let applied_col = label.applied_column();

        match self.row_exists(label).await {
            Ok(true) => {}
            Ok(false) => return Err(StopReason::RowMissing(label)),
            Err(e) => return store_failed(label, e),
        }

        match self.read(label, &applied_col).await {
            Ok(Some(cell)) if !cell.is_blank() => return Ok(CheckpointResult::AlreadyApplied),
            Ok(_) => {}
            Err(e) => return store_failed(label, e),
        }

        // a price without an applied mark is left over from an interrupted pass
        match self.read(label, &price_col).await {
            Ok(Some(cell)) => {
                if let Some(price) = cell.as_f64().filter(|p| p.is_finite() && *p > 0.0) {
                    info!(
                        signal_id = %self.signal.id,
                        checkpoint = %label,
                        price = price,
                        "Reconciling checkpoint with stored price"
                    );
                    self.transition(TaskState::Applying(label));
                    return self.complete(label, price, true).await;
                }
            }
            Ok(None) => {}
            Err(e) => return store_failed(label, e),
        }

        self.transition(TaskState::Fetching(label));
        let price = match self.fetch_price(label, next_due).await {
            Ok(price) => price,
            Err(OracleError::NotFound(symbol)) => {
                return Ok(CheckpointResult::Abandoned(AbandonReason::SymbolNotFound(symbol)))
            }
            Err(e) => {
                return Ok(CheckpointResult::Abandoned(AbandonReason::OracleExhausted(
                    e.to_string(),
                )))
            }
        };

        self.transition(TaskState::Applying(label));

        // another actor may have applied it while we were fetching
        match self.read(label, &applied_col).await {
            Ok(Some(cell)) if !cell.is_blank() => return Ok(CheckpointResult::AlreadyApplied),
            Ok(_) => {}
            Err(e) => return store_failed(label, e),
        }

        if let Err(e) = self.write(label, &price_col, CellValue::from(price)).await {
            return store_failed(label, e);
        }
        self.complete(label, price, false).await
    }

    /// Write the pct change and then the applied mark
    async fn complete(
        &mut self,
        label: CheckpointLabel,
        price: f64,
        reconciled: bool,
    ) -> Result<CheckpointResult, StopReason> {
        let pct = pct_change(self.signal.side, self.signal.entry_price, price);
        if let Err(e) = self.write(label, &label.pct_column(), CellValue::from(pct)).await {
            return store_failed(label, e);
        }

        let applied_at = self.ctx.clock.now();
        if let Err(e) = self
            .write(label, &label.applied_column(), CellValue::timestamp(applied_at))
            .await
        {
            return store_failed(label, e);
        }

        Ok(if reconciled {
            CheckpointResult::Reconciled {
                price,
                pct_change: pct,
                applied_at,
            }
        } else {
            CheckpointResult::Applied {
                price,
                pct_change: pct,
                applied_at,
            }
        })
    }

    async fn fetch_price(
        &self,
        label: CheckpointLabel,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<f64, OracleError> {
        let oracle = &self.ctx.oracle;
        let symbol = self.signal.symbol.as_str();
        let signal_id = &self.signal.id;
        let metrics = self.ctx.metrics.clone();

        let fetch = self.ctx.fetch_retry.run(
            || async move { oracle.price(symbol).await },
            |e: &OracleError| e.is_transient(),
            |e: &OracleError, delay: Duration| {
                if let Some(ref m) = metrics {
                    m.oracle_retries_total.inc();
                }
                warn!(
                    signal_id = %signal_id,
                    symbol = %symbol,
                    checkpoint = %label,
                    error = %e,
                    retry_in_secs = delay.as_secs_f64(),
                    "Price fetch failed, backing off"
                );
            },
        );

        // retries for this checkpoint must not run into the next one
        let window = next_due
            .map(|due| self.ctx.clock.until(due))
            .filter(|d| !d.is_zero());
        match window {
            Some(window) => tokio::time::timeout(window, fetch).await.unwrap_or_else(|_| {
                Err(OracleError::Unavailable(format!(
                    "retry window closed before {} checkpoint",
                    label
                )))
            }),
            None => fetch.await,
        }
    }

    async fn row_exists(&self, label: CheckpointLabel) -> Result<bool, StoreError> {
        let store = &self.ctx.store;
        let row = self.signal.row_id;
        store_retry(&self.ctx.write_retry, &self.signal.id, label, "liveness check", || async move {
            store.row_exists(row).await
        })
        .await
    }

    async fn read(&self, label: CheckpointLabel, column: &str) -> Result<Option<CellValue>, StoreError> {
        let store = &self.ctx.store;
        let row = self.signal.row_id;
        store_retry(&self.ctx.write_retry, &self.signal.id, label, "read", || async move {
            store.read_cell(row, column).await
        })
        .await
    }

    async fn write(&self, label: CheckpointLabel, column: &str, value: CellValue) -> Result<(), StoreError> {
        let store = &self.ctx.store;
        let row = self.signal.row_id;
        store_retry(&self.ctx.write_retry, &self.signal.id, label, "write", || {
            let value = value.clone();
            async move { store.write_cell(row, column, value).await }
        })
        .await
    }

    fn record(&self, label: CheckpointLabel, result: &CheckpointResult) {
        match result {
            CheckpointResult::Applied { price, pct_change, .. }
            | CheckpointResult::Reconciled { price, pct_change, .. } => {
                info!(
                    signal_id = %self.signal.id,
                    symbol = %self.signal.symbol,
                    checkpoint = %label,
                    price = *price,
                    pct_change = *pct_change,
                    "Checkpoint applied"
                );
                if let Some(ref m) = self.ctx.metrics {
                    m.checkpoints_applied_total
                        .with_label_values(&[label.as_str()])
                        .inc();
                }
            }
            CheckpointResult::AlreadyApplied => {
                debug!(signal_id = %self.signal.id, checkpoint = %label, "Checkpoint already applied, skipping");
                if let Some(ref m) = self.ctx.metrics {
                    m.checkpoints_skipped_total.inc();
                }
            }
            CheckpointResult::Abandoned(reason) => {
                warn!(
                    signal_id = %self.signal.id,
                    symbol = %self.signal.symbol,
                    checkpoint = %label,
                    reason = ?reason,
                    "Checkpoint abandoned"
                );
                if let Some(ref m) = self.ctx.metrics {
                    m.checkpoints_abandoned_total
                        .with_label_values(&[label.as_str()])
                        .inc();
                }
            }
        }
    }

    fn abandon(
        mut self,
        stop: StopReason,
        results: Vec<(CheckpointLabel, CheckpointResult)>,
    ) -> TrackReport {
        self.transition(TaskState::Abandoned);
        info!(
            signal_id = %self.signal.id,
            symbol = %self.signal.symbol,
            stop = ?stop,
            applied = results.iter().filter(|(_, r)| r.is_applied()).count(),
            "Tracking stopped"
        );
        TrackReport {
            signal_id: self.signal.id,
            state: TaskState::Abandoned,
            stop: Some(stop),
            results,
        }
    }

    async fn finish(mut self, results: Vec<(CheckpointLabel, CheckpointResult)>) -> TrackReport {
        let all_applied = results.len() == CheckpointLabel::ALL.len()
            && results.iter().all(|(_, r)| r.is_applied());
        let status = if all_applied {
            SignalStatus::Completed
        } else {
            SignalStatus::Abandoned
        };

        let last = CheckpointLabel::D1;
        if let Err(e) = self
            .write(last, columns::STATUS, CellValue::from(status.as_str()))
            .await
        {
            warn!(signal_id = %self.signal.id, error = %e, "Failed to record final signal status");
        }

        self.transition(TaskState::Completed);
        info!(
            signal_id = %self.signal.id,
            symbol = %self.signal.symbol,
            status = status.as_str(),
            "Tracking completed"
        );
        TrackReport {
            signal_id: self.signal.id,
            state: TaskState::Completed,
            stop: None,
            results,
        }
    }
}

fn store_failed(label: CheckpointLabel, e: StoreError) -> Result<CheckpointResult, StopReason> {
    match e {
        StoreError::RowMissing(_) => Err(StopReason::RowMissing(label)),
        other => Ok(CheckpointResult::Abandoned(AbandonReason::StoreFailure(
            other.to_string(),
        ))),
    }
}

async fn store_retry<T, Fut, Op>(
    policy: &RetryPolicy,
    signal_id: &SignalId,
    label: CheckpointLabel,
    what: &str,
    op: Op,
) -> Result<T, StoreError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    policy
        .run(
            op,
            |e: &StoreError| !matches!(e, StoreError::RowMissing(_)),
            |e: &StoreError, delay: Duration| {
                warn!(
                    signal_id = %signal_id,
                    checkpoint = %label,
                    error = %e,
                    retry_in_secs = delay.as_secs_f64(),
                    "Row store {} failed, retrying",
                    what
                );
            },
        )
        .await
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
