//! Background jobs: per-signal checkpoint tracking and the daily reset

pub mod context;
pub mod daily_reset;
pub mod tracker;
pub mod tracking;

pub use context::JobContext;
pub use daily_reset::{DailyReset, ResetError};
pub use tracker::Tracker;
pub use tracking::{
    AbandonReason, CheckpointResult, CheckpointTask, StopReason, TaskState, TrackReport,
};
