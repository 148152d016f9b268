//! Signal ledger: dedup index, signal rows and the buy/sell counter

use crate::db::{CellValue, RowId, RowStore, StoreError};
use crate::models::signal::columns;
use crate::models::{CounterSnapshot, Side, Signal, SignalId, SignalStatus};
use crate::signals::normalize::{self, InvalidSignal};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid signal: {0}")]
    Invalid(#[from] InvalidSignal),
    /// Not a failure for callers: the signal was already accepted
    #[error("duplicate signal {0}")]
    Duplicate(SignalId),
    #[error("failed to persist signal: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    entry_time: DateTime<Utc>,
    /// `None` while the row append is in flight
    row: Option<RowId>,
}

pub struct SignalLedger {
    store: Arc<dyn RowStore>,
    window: Duration,
    index: Mutex<HashMap<SignalId, IndexEntry>>,
    /// Process-local; a restart starts the day from zero
    counter: Mutex<CounterSnapshot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SignalLedger {
    pub fn new(store: Arc<dyn RowStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            index: Mutex::new(HashMap::new()),
            counter: Mutex::new(CounterSnapshot::default()),
        }
    }

    /// Validate, deduplicate and persist one alert.
    ///
    /// Exactly one row and one counter increment happen per unique id.
    pub async fn submit(
        &self,
        ticker: &str,
        raw_price: &str,
        raw_side: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<Signal, LedgerError> {
        let side = normalize::parse_side(raw_side)?;
        let entry_price = normalize::parse_price(raw_price)?;
        let symbol = normalize::normalize_symbol(ticker)?;
        let id = normalize::signal_id(ticker, entry_price, side, submitted_at, self.window);

        // check-and-insert in one critical section
        {
            let mut index = lock(&self.index);
            if index.contains_key(&id) {
                return Err(LedgerError::Duplicate(id));
            }
            index.insert(
                id.clone(),
                IndexEntry {
                    entry_time: submitted_at,
                    row: None,
                },
            );
        }

        let fields = signal_row(&id, &symbol, side, entry_price, submitted_at);
        let row_id = match self.store.append_row(fields).await {
            Ok(row_id) => row_id,
            Err(e) => {
                lock(&self.index).remove(&id);
                return Err(LedgerError::Store(e));
            }
        };

        if let Some(entry) = lock(&self.index).get_mut(&id) {
            entry.row = Some(row_id);
        }
        self.increment(side);

        debug!(signal_id = %id, symbol = %symbol, side = %side, row_id = row_id, "Signal recorded");

        Ok(Signal {
            id,
            symbol,
            side,
            entry_price,
            entry_time: submitted_at,
            status: SignalStatus::Active,
            row_id,
        })
    }

    fn increment(&self, side: Side) {
        let mut counter = lock(&self.counter);
        match side {
            Side::Buy => counter.buy_count += 1,
            Side::Sell => counter.sell_count += 1,
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        *lock(&self.counter)
    }

    /// Snapshot the counter and zero it in one step
    pub fn take_counters(&self) -> CounterSnapshot {
        std::mem::take(&mut *lock(&self.counter))
    }

    /// Add a previously taken snapshot back, e.g. after a failed report write
    pub fn restore_counters(&self, snapshot: CounterSnapshot) {
        let mut counter = lock(&self.counter);
        counter.buy_count += snapshot.buy_count;
        counter.sell_count += snapshot.sell_count;
    }

    /// Row backing an accepted signal
    pub fn lookup(&self, id: &SignalId) -> Option<RowId> {
        lock(&self.index).get(id).and_then(|entry| entry.row)
    }

    pub fn len(&self) -> usize {
        lock(&self.index).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget ids accepted before `cutoff`; returns how many were dropped.
    /// Entries whose row append is still in flight are kept.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut index = lock(&self.index);
        let before = index.len();
        index.retain(|_, entry| entry.row.is_none() || entry.entry_time >= cutoff);
        before - index.len()
    }
}

fn signal_row(
    id: &SignalId,
    symbol: &str,
    side: Side,
    entry_price: f64,
    entry_time: DateTime<Utc>,
) -> Vec<(String, CellValue)> {
    vec![
        (columns::SIGNAL_ID.to_string(), CellValue::from(id.as_str())),
        (columns::ENTRY_TIME.to_string(), CellValue::timestamp(entry_time)),
        (columns::SIDE.to_string(), CellValue::from(side.as_str())),
        (columns::SYMBOL.to_string(), CellValue::from(symbol)),
        (columns::ENTRY_PRICE.to_string(), CellValue::from(entry_price)),
        (columns::STATUS.to_string(), CellValue::from(SignalStatus::Active.as_str())),
    ]
}
