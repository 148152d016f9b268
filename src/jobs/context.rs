//! Job context for dependency injection

use crate::core::clock::{Clock, SystemClock};
use crate::core::retry::RetryPolicy;
use crate::db::RowStore;
use crate::metrics::Metrics;
use crate::services::market_data::PriceOracle;
use std::sync::Arc;
use std::time::Duration;

/// Shared, read-only dependencies of every checkpoint tracking task.
///
/// Tasks never share mutable state with each other; everything they touch
/// goes through the oracle and the row store, both safe for concurrent use.
pub struct JobContext {
    pub oracle: Arc<dyn PriceOracle>,
    pub store: Arc<dyn RowStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<Arc<Metrics>>,
    /// Backoff for transient oracle failures, per checkpoint
    pub fetch_retry: RetryPolicy,
    /// Row-store reads and writes get exactly one retry
    pub write_retry: RetryPolicy,
    /// Longest uninterrupted sleep before the row is checked again
    pub liveness_poll: Duration,
}

impl JobContext {
    pub fn new(oracle: Arc<dyn PriceOracle>, store: Arc<dyn RowStore>) -> Self {
        Self {
            oracle,
            store,
            clock: Arc::new(SystemClock),
            metrics: None,
            fetch_retry: RetryPolicy::default(),
            write_retry: RetryPolicy::once(Duration::from_secs(5)),
            liveness_poll: Duration::from_secs(300),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    pub fn with_liveness_poll(mut self, interval: Duration) -> Self {
        self.liveness_poll = interval.max(Duration::from_secs(1));
        self
    }
}
