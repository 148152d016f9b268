//! Counter snapshots and daily reports

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod columns {
    pub const DATE: &str = "date";
    pub const BUY_COUNT: &str = "buy_count";
    pub const SELL_COUNT: &str = "sell_count";
    pub const TOTAL: &str = "total";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub buy_count: u64,
    pub sell_count: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.buy_count + self.sell_count
    }
}

/// Immutable record of the counters at reset time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub buy_count: u64,
    pub sell_count: u64,
}

impl DailyReport {
    pub fn new(date: NaiveDate, counts: CounterSnapshot) -> Self {
        Self {
            date,
            buy_count: counts.buy_count,
            sell_count: counts.sell_count,
        }
    }

    pub fn total(&self) -> u64 {
        self.buy_count + self.sell_count
    }
}
