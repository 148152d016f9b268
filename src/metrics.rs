//! Prometheus metrics for intake, tracking and the daily reset

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: Gauge,

    pub signals_accepted_total: IntCounterVec,
    pub signals_duplicate_total: IntCounter,
    pub signals_rejected_total: IntCounter,

    pub checkpoints_applied_total: IntCounterVec,
    pub checkpoints_abandoned_total: IntCounterVec,
    pub checkpoints_skipped_total: IntCounter,
    pub tracking_tasks_active: IntGauge,
    pub oracle_retries_total: IntCounter,

    pub daily_resets_total: IntCounter,
    pub notifications_failed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total =
            IntCounter::new("http_requests_total", "Total HTTP requests handled")?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        ))?;
        let http_requests_in_flight =
            Gauge::new("http_requests_in_flight", "HTTP requests currently being served")?;

        let signals_accepted_total = IntCounterVec::new(
            Opts::new("signals_accepted_total", "Signals accepted by the ledger"),
            &["side"],
        )?;
        let signals_duplicate_total = IntCounter::new(
            "signals_duplicate_total",
            "Submissions collapsed onto an existing signal",
        )?;
        let signals_rejected_total =
            IntCounter::new("signals_rejected_total", "Submissions rejected as invalid")?;

        let checkpoints_applied_total = IntCounterVec::new(
            Opts::new("checkpoints_applied_total", "Checkpoints written to the row store"),
            &["checkpoint"],
        )?;
        let checkpoints_abandoned_total = IntCounterVec::new(
            Opts::new("checkpoints_abandoned_total", "Checkpoints given up after retries"),
            &["checkpoint"],
        )?;
        let checkpoints_skipped_total = IntCounter::new(
            "checkpoints_skipped_total",
            "Checkpoints found already applied",
        )?;
        let tracking_tasks_active =
            IntGauge::new("tracking_tasks_active", "Signals currently being tracked")?;
        let oracle_retries_total =
            IntCounter::new("oracle_retries_total", "Price oracle retries after transient errors")?;

        let daily_resets_total =
            IntCounter::new("daily_resets_total", "Completed daily counter resets")?;
        let notifications_failed_total = IntCounter::new(
            "notifications_failed_total",
            "Notifications that could not be delivered",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(signals_accepted_total.clone()))?;
        registry.register(Box::new(signals_duplicate_total.clone()))?;
        registry.register(Box::new(signals_rejected_total.clone()))?;
        registry.register(Box::new(checkpoints_applied_total.clone()))?;
        registry.register(Box::new(checkpoints_abandoned_total.clone()))?;
        registry.register(Box::new(checkpoints_skipped_total.clone()))?;
        registry.register(Box::new(tracking_tasks_active.clone()))?;
        registry.register(Box::new(oracle_retries_total.clone()))?;
        registry.register(Box::new(daily_resets_total.clone()))?;
        registry.register(Box::new(notifications_failed_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            signals_accepted_total,
            signals_duplicate_total,
            signals_rejected_total,
            checkpoints_applied_total,
            checkpoints_abandoned_total,
            checkpoints_skipped_total,
            tracking_tasks_active,
            oracle_retries_total,
            daily_resets_total,
            notifications_failed_total,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
