//! Shared data models spanning intake, tracking and reporting.

pub mod checkpoint;
pub mod report;
pub mod signal;

pub use checkpoint::{pct_change, Checkpoint, CheckpointLabel, CheckpointPlan};
pub use report::{CounterSnapshot, DailyReport};
pub use signal::{Side, Signal, SignalId, SignalStatus};
