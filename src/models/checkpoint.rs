//! Checkpoint schedule and performance math

use crate::models::signal::Side;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of measurement points after entry, in due order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckpointLabel {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl CheckpointLabel {
    pub const ALL: [CheckpointLabel; 4] = [Self::M15, Self::H1, Self::H4, Self::D1];

    pub fn offset_seconds(&self) -> i64 {
        match self {
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::seconds(self.offset_seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn price_column(&self) -> String {
        format!("price_{}", self.as_str())
    }

    pub fn pct_column(&self) -> String {
        format!("pct_{}", self.as_str())
    }

    pub fn applied_column(&self) -> String {
        format!("applied_{}", self.as_str())
    }
}

impl fmt::Display for CheckpointLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled measurement. `applied_at` is write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub label: CheckpointLabel,
    pub due_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub observed_price: Option<f64>,
    pub pct_change: Option<f64>,
}

impl Checkpoint {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Due times for all checkpoints of a signal, fixed at creation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPlan {
    entry_time: DateTime<Utc>,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointPlan {
    pub fn new(entry_time: DateTime<Utc>) -> Self {
        let checkpoints = CheckpointLabel::ALL
            .iter()
            .map(|label| Checkpoint {
                label: *label,
                due_at: entry_time + label.offset(),
                applied_at: None,
                observed_price: None,
                pct_change: None,
            })
            .collect();
        Self {
            entry_time,
            checkpoints,
        }
    }

    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn due_at(&self, label: CheckpointLabel) -> DateTime<Utc> {
        self.entry_time + label.offset()
    }
}

/// Price move as a ratio, positive when the market moved in the signal's favor
pub fn pct_change(side: Side, entry_price: f64, current_price: f64) -> f64 {
    match side {
        Side::Buy => (current_price - entry_price) / entry_price,
        Side::Sell => (entry_price - current_price) / entry_price,
    }
}
